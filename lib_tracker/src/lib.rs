//! # lib_tracker
//!
//! Shared library for the live flight tracker. It turns a stream of aircraft
//! "pings" arriving over a WebSocket into an in-memory, time-bounded view of
//! the flights that are currently active.
//!
//! ## Layout
//!
//! - **`model`**: the inbound `PingEnvelope` (wire shape plus validation) and the
//!   cached `FlightEntity` it maps to.
//! - **`core`**: the `FlightCache`, the clock it reads freshness against and the
//!   ordered subscriber set used by the ingestor.
//! - **`ingestors`** (feature `ingestors`): the `StreamTransport`, a WebSocket
//!   client that keeps one logical connection alive with fixed-delay reconnects.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod model;

#[cfg(feature = "ingestors")]
pub mod ingestors;

pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::flight_cache::{FlightCache, FRESHNESS_WINDOW};
pub use model::envelope::{Aircraft, FrameError, PingEnvelope, Position, Vector};
pub use model::flight::{FlightEntity, Kinematics, PositionSnapshot};

#[cfg(feature = "ingestors")]
pub use ingestors::ping_wss::{ConnectionStatus, MessageHandler, StreamTransport, TransportConfig, TransportError};
