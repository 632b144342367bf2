//! # Data Ingestors Module
//!
//! Network clients that feed the tracker. Each submodule owns the connection
//! lifecycle for one upstream source and hands validated messages to its
//! subscribers.
//!
//! ## Contained Modules:
//! - **`ping_wss`**: A resilient WebSocket client for the live aircraft ping
//!   stream, with fixed-delay reconnects and per-frame validation.

/// The WebSocket client for the live aircraft ping stream.
pub mod ping_wss;

// --- Public API Re-exports ---
pub use ping_wss::{ConnectionStatus, MessageHandler, StreamTransport, TransportConfig, TransportError};
