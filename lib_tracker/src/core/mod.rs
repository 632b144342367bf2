//! # Core Module
//!
//! The in-process state of the tracker. Nothing in here touches the network.
//!
//! ## Core Components:
//!
//! - **`flight_cache`**: identity-keyed store of flights with freshness-based
//!   reads and eviction.
//! - **`clock`**: the time source the cache judges freshness against.
//! - **`dispatcher`**: the ordered, de-duplicated subscriber set the ingestor
//!   delivers validated pings through.

/// Time source abstraction for freshness checks.
pub mod clock;
/// Ordered subscriber set with set semantics.
pub mod dispatcher;
/// The time-windowed flight cache.
pub mod flight_cache;

// --- Public API Re-exports ---
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Dispatcher, Handler};
pub use flight_cache::{FlightCache, FRESHNESS_WINDOW};
