//! # Flight Cache
//!
//! The authoritative set of flights the process currently knows about, keyed
//! by transponder address, with time-based liveness.
//!
//! ## Behaviour
//!
//! - **Dedup**: one `FlightEntity` per identity. A ping for a known identity
//!   is applied in place; a ping for an unknown identity creates the entity.
//! - **Freshness**: a flight is active while its last update is younger than
//!   `FRESHNESS_WINDOW`. `active()` and `evict_stale()` both read the clock
//!   exactly once per call and judge every entity against that one reading.
//! - **No timers**: the cache never evicts on its own. The owner decides the
//!   cadence of `evict_stale()`.
//!
//! Every method is synchronous and takes `&self` or `&mut self`, so a reader
//! can never observe an entity halfway through an update.

use std::collections::HashMap;

use crate::core::clock::{Clock, SystemClock};
use crate::model::envelope::PingEnvelope;
use crate::model::flight::FlightEntity;

pub use crate::model::flight::FRESHNESS_WINDOW;

/// Identity-keyed store of `FlightEntity` values.
pub struct FlightCache<C: Clock = SystemClock> {
    flights: HashMap<String, FlightEntity>,
    clock: C,
}

impl FlightCache<SystemClock> {
    /// Creates an empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for FlightCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FlightCache<C> {
    /// Creates an empty cache reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            flights: HashMap::new(),
            clock,
        }
    }

    /// # Upsert
    ///
    /// Inserts a new flight for an unseen identity, otherwise replaces the
    /// existing flight's fields with the ones carried by `ping`.
    ///
    /// No validation happens here; the ingestor only forwards validated pings.
    pub fn upsert(&mut self, ping: &PingEnvelope) {
        match self.flights.get_mut(ping.identity()) {
            Some(flight) => flight.apply(ping),
            None => {
                let flight = FlightEntity::from_envelope(ping);
                log::debug!("Tracking new flight {} ({})", flight.icao24, flight.callsign);
                self.flights.insert(flight.icao24.clone(), flight);
            }
        }
    }

    /// Every tracked flight regardless of freshness. Order is unspecified.
    pub fn all(&self) -> Vec<&FlightEntity> {
        self.flights.values().collect()
    }

    /// Flights whose last update falls inside the freshness window.
    pub fn active(&self) -> Vec<&FlightEntity> {
        let now = self.clock.now();
        self.flights.values().filter(|f| f.is_active_at(now)).collect()
    }

    /// Number of flights `active()` would return right now.
    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        self.flights.values().filter(|f| f.is_active_at(now)).count()
    }

    pub fn get(&self, icao24: &str) -> Option<&FlightEntity> {
        self.flights.get(icao24)
    }

    /// Drops every flight outside the freshness window.
    pub fn evict_stale(&mut self) {
        self.evict_stale_count();
    }

    /// Same as `evict_stale`, returning how many flights were dropped.
    pub fn evict_stale_count(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.flights.len();
        self.flights.retain(|_, flight| flight.is_active_at(now));
        let evicted = before - self.flights.len();
        if evicted > 0 {
            log::debug!("Evicted {} stale flights, {} remain", evicted, self.flights.len());
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::model::envelope::{Aircraft, Position, Vector};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(T0, 0).unwrap()
    }

    fn ping(icao24: &str, altitude: f64, secs: i64) -> PingEnvelope {
        PingEnvelope {
            id: format!("ping-{icao24}-{secs}"),
            aircraft: Aircraft {
                icao24: icao24.to_string(),
                callsign: format!("CS{icao24}"),
                origin_country: "US".to_string(),
                last_contact: secs as f64,
                sensors: vec![1, 2],
                ..Default::default()
            },
            vector: Vector {
                velocity: 250.0,
                true_track: 180.0,
                vertical_rate: -2.5,
            },
            position: Position {
                latitude: 37.7749,
                longitude: -122.4194,
                geo_altitude: altitude,
                baro_altitude: altitude - 50.0,
                time: secs as f64,
                ..Default::default()
            },
            last_update: secs as f64,
        }
    }

    fn cache() -> (FlightCache<ManualClock>, ManualClock) {
        let clock = ManualClock::new(start());
        (FlightCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn upsert_then_get_round_trips_fields() {
        let (mut cache, _) = cache();
        let update = ping("abc123", 10000.0, T0);
        cache.upsert(&update);

        let flight = cache.get("abc123").expect("flight is tracked");
        assert_eq!(flight.callsign, "CSabc123");
        assert_eq!(flight.geo_altitude, 10000.0);
        assert_eq!(flight.baro_altitude, 9950.0);
        assert_eq!(flight.velocity, 250.0);
        assert_eq!(flight.vertical_rate, -2.5);
        assert_eq!(flight.sensors, vec![1, 2]);
        assert_eq!(flight.last_update.timestamp_millis(), T0 * 1000);
        assert_eq!(flight.to_envelope(), update);
    }

    #[test]
    fn repeated_upserts_keep_one_entity() {
        let (mut cache, _) = cache();
        for altitude in [10000.0, 15000.0, 15000.0] {
            cache.upsert(&ping("abc123", altitude, T0));
        }

        let all = cache.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].geo_altitude, 15000.0);
    }

    #[test]
    fn get_unknown_identity_is_none() {
        let (cache, _) = cache();
        assert!(cache.get("nonexistent").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn active_is_a_subset_of_all() {
        let (mut cache, _) = cache();
        cache.upsert(&ping("fresh", 10000.0, T0 - 10));
        cache.upsert(&ping("stale", 10000.0, T0 - 400));

        let all: Vec<&str> = cache.all().into_iter().map(|f| f.icao24.as_str()).collect();
        let active: Vec<&str> = cache.active().into_iter().map(|f| f.icao24.as_str()).collect();

        assert_eq!(all.len(), 2);
        assert_eq!(active, vec!["fresh"]);
        assert!(active.iter().all(|id| all.contains(id)));
        assert_eq!(cache.active_count(), 1);
    }

    #[test]
    fn evict_stale_is_idempotent_and_leaves_fresh_untouched() {
        let (mut cache, _) = cache();
        cache.upsert(&ping("fresh", 12000.0, T0 - 10));
        cache.upsert(&ping("stale", 10000.0, T0 - 400));
        let fresh_before = cache.get("fresh").cloned();

        assert_eq!(cache.evict_stale_count(), 1);
        assert_eq!(cache.evict_stale_count(), 0);

        assert!(cache.get("stale").is_none());
        assert_eq!(cache.get("fresh").cloned(), fresh_before);
    }

    #[test]
    fn flight_expires_after_window() {
        let (mut cache, clock) = cache();
        cache.upsert(&ping("X", 10000.0, T0));
        assert_eq!(cache.active().len(), 1);

        clock.advance(Duration::from_secs(301));
        cache.evict_stale();

        assert!(cache.active().is_empty());
        assert!(cache.get("X").is_none());
    }

    #[test]
    fn late_ping_revives_entity() {
        let (mut cache, clock) = cache();
        cache.upsert(&ping("X", 10000.0, T0));
        clock.advance(Duration::from_secs(400));
        assert!(cache.active().is_empty());

        cache.upsert(&ping("X", 11000.0, T0 + 400));
        assert_eq!(cache.active().len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
