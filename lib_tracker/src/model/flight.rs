//! # Flight Entity
//!
//! The cached, mutable record of one tracked aircraft. Entities are created
//! and mutated only by the `FlightCache`; everybody else sees shared
//! references.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::model::envelope::{Aircraft, PingEnvelope, Position, Vector};

/// How long a flight stays active without a new ping.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(5 * 60);

const COMPASS_POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Cached state of one aircraft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightEntity {
    /// Transponder address. Never changes after creation.
    pub icao24: String,
    /// Id of the most recent ping applied.
    pub ping_id: String,
    pub callsign: String,
    pub origin_country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geo_altitude: f64,
    pub baro_altitude: f64,
    pub on_ground: bool,
    pub velocity: f64,
    pub vertical_rate: f64,
    pub true_track: f64,
    pub last_update: DateTime<Utc>,
    pub squawk: String,
    pub spi: bool,
    pub sensors: Vec<i64>,
    pub position_source: i64,
}

/// Where the aircraft is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub geo_altitude: f64,
    pub baro_altitude: f64,
}

/// How the aircraft is moving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Kinematics {
    pub velocity: f64,
    pub vertical_rate: f64,
    pub on_ground: bool,
}

impl FlightEntity {
    /// Builds a fresh entity from a validated ping.
    pub fn from_envelope(ping: &PingEnvelope) -> Self {
        let mut flight = Self {
            icao24: ping.identity().to_string(),
            ping_id: String::new(),
            callsign: String::new(),
            origin_country: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            geo_altitude: 0.0,
            baro_altitude: 0.0,
            on_ground: false,
            velocity: 0.0,
            vertical_rate: 0.0,
            true_track: 0.0,
            last_update: DateTime::<Utc>::default(),
            squawk: String::new(),
            spi: false,
            sensors: Vec::new(),
            position_source: 0,
        };
        flight.apply(ping);
        flight
    }

    /// Replaces every mutable field with the values carried by `ping`.
    ///
    /// The identity is left untouched. No ordering check is made against the
    /// current `last_update`: the last ping applied wins.
    pub fn apply(&mut self, ping: &PingEnvelope) {
        self.ping_id.clone_from(&ping.id);
        self.callsign.clone_from(&ping.aircraft.callsign);
        self.origin_country.clone_from(&ping.aircraft.origin_country);
        self.squawk.clone_from(&ping.aircraft.squawk);
        self.spi = ping.aircraft.spi;
        self.sensors.clone_from(&ping.aircraft.sensors);

        self.latitude = ping.position.latitude;
        self.longitude = ping.position.longitude;
        self.geo_altitude = ping.position.geo_altitude;
        self.baro_altitude = ping.position.baro_altitude;
        self.on_ground = ping.position.on_ground;
        self.position_source = ping.position.source;

        self.velocity = ping.vector.velocity;
        self.vertical_rate = ping.vector.vertical_rate;
        self.true_track = ping.vector.true_track;

        let millis = ping.timestamp_millis();
        self.last_update = DateTime::from_timestamp_millis(millis).unwrap_or_else(|| {
            log::warn!("Ping {} carries an out-of-range timestamp: {} ms", ping.id, millis);
            DateTime::<Utc>::default()
        });
    }

    /// `true` while `now - last_update` is shorter than `FRESHNESS_WINDOW`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.last_update).num_milliseconds();
        age_ms < FRESHNESS_WINDOW.as_millis() as i64
    }

    pub fn position(&self) -> PositionSnapshot {
        PositionSnapshot {
            latitude: self.latitude,
            longitude: self.longitude,
            geo_altitude: self.geo_altitude,
            baro_altitude: self.baro_altitude,
        }
    }

    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            velocity: self.velocity,
            vertical_rate: self.vertical_rate,
            on_ground: self.on_ground,
        }
    }

    /// Eight-point compass direction of the current heading.
    pub fn heading_cardinal(&self) -> &'static str {
        let sector = (self.true_track.rem_euclid(360.0) / 45.0).round() as usize;
        COMPASS_POINTS[sector % COMPASS_POINTS.len()]
    }

    /// Maps the entity back onto the wire shape, timestamps in seconds.
    pub fn to_envelope(&self) -> PingEnvelope {
        let secs = self.last_update.timestamp_millis() as f64 / 1000.0;
        PingEnvelope {
            id: self.ping_id.clone(),
            aircraft: Aircraft {
                icao24: self.icao24.clone(),
                callsign: self.callsign.clone(),
                origin_country: self.origin_country.clone(),
                last_contact: secs,
                squawk: self.squawk.clone(),
                spi: self.spi,
                sensors: self.sensors.clone(),
            },
            vector: Vector {
                velocity: self.velocity,
                true_track: self.true_track,
                vertical_rate: self.vertical_rate,
            },
            position: Position {
                longitude: self.longitude,
                latitude: self.latitude,
                geo_altitude: self.geo_altitude,
                baro_altitude: self.baro_altitude,
                on_ground: self.on_ground,
                source: self.position_source,
                time: secs,
            },
            last_update: secs,
        }
    }
}
