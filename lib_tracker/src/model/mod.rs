//! # Model Module
//!
//! Data types shared by the ingestor and the cache.
//!
//! - **`envelope`**: the inbound `PingEnvelope`, its validation rules and the
//!   `FrameError` returned for frames that must be dropped.
//! - **`flight`**: the cached `FlightEntity` and the freshness window it is
//!   judged against.

/// Wire shape of an inbound ping and its validation.
pub mod envelope;
/// The cached flight record.
pub mod flight;

pub use envelope::{FrameError, PingEnvelope};
pub use flight::{FlightEntity, FRESHNESS_WINDOW};
