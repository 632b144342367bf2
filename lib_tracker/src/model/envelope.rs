//! # Ping Envelope
//!
//! Wire-level shape of one aircraft update ("ping") as it arrives on the socket,
//! together with the validation and normalization applied before a frame is
//! allowed anywhere near the cache.
//!
//! A frame is accepted only when it carries a non-empty string `id`, object
//! `aircraft`, `vector` and `position` sub-structures, and a numeric
//! `last_update`. Inside an accepted frame scalar fields are coerced to their
//! declared type: numbers and booleans become strings, numeric strings and
//! integral floats become numbers. A field that is missing, `null` or cannot
//! be coerced takes its default value and never rejects the frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reasons an inbound frame is dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed, but the top level is not an object.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// A required field is absent or structurally wrong.
    #[error("Missing or invalid field: {0}")]
    MissingField(&'static str),

    /// The frame passed the structural checks but still failed to decode.
    #[error("Field decode error: {0}")]
    Decode(String),
}

/// Identification block of a ping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Aircraft {
    /// Transponder address, the identity of the tracked flight.
    #[serde(deserialize_with = "lenient_string")]
    pub icao24: String,
    #[serde(deserialize_with = "lenient_string")]
    pub callsign: String,
    #[serde(deserialize_with = "lenient_string")]
    pub origin_country: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub last_contact: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub squawk: String,
    /// Special purpose indicator.
    #[serde(deserialize_with = "lenient_bool")]
    pub spi: bool,
    pub sensors: Vec<i64>,
}

/// Kinematic block of a ping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector {
    #[serde(deserialize_with = "lenient_f64")]
    pub velocity: f64,
    /// Heading in degrees clockwise from north.
    #[serde(deserialize_with = "lenient_f64")]
    pub true_track: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub vertical_rate: f64,
}

/// Position block of a ping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    #[serde(deserialize_with = "lenient_f64")]
    pub longitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub geo_altitude: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub baro_altitude: f64,
    #[serde(deserialize_with = "lenient_bool")]
    pub on_ground: bool,
    /// Origin of the position report (ADS-B, ASTERIX, MLAT, ...).
    #[serde(deserialize_with = "lenient_i64")]
    pub source: i64,
    /// Seconds since epoch of the position fix.
    #[serde(deserialize_with = "lenient_f64")]
    pub time: f64,
}

/// One validated, normalized ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingEnvelope {
    pub id: String,
    pub aircraft: Aircraft,
    pub vector: Vector,
    pub position: Position,
    /// Seconds since epoch.
    pub last_update: f64,
}

impl PingEnvelope {
    /// Validates and normalizes a raw text frame.
    ///
    /// # Errors
    /// Returns a `FrameError` describing why the frame must be dropped. No
    /// partial envelope is ever produced.
    pub fn parse_frame(text: &str) -> Result<Self, FrameError> {
        let mut raw: Value = serde_json::from_str(text)?;
        let obj = raw.as_object_mut().ok_or(FrameError::NotAnObject)?;

        match obj.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {}
            _ => return Err(FrameError::MissingField("id")),
        }
        for key in ["aircraft", "vector", "position"] {
            if !obj.get(key).is_some_and(Value::is_object) {
                return Err(FrameError::MissingField(key));
            }
        }
        if !obj.get("last_update").is_some_and(Value::is_number) {
            return Err(FrameError::MissingField("last_update"));
        }

        if let Some(aircraft) = obj.get_mut("aircraft").and_then(Value::as_object_mut) {
            normalize_sensors(aircraft);
        }

        serde_json::from_value(raw).map_err(|e| FrameError::Decode(e.to_string()))
    }

    /// Key the cache tracks this ping under: the transponder address, or the
    /// ping id when the address is blank.
    pub fn identity(&self) -> &str {
        if self.aircraft.icao24.is_empty() {
            &self.id
        } else {
            &self.aircraft.icao24
        }
    }

    /// Update time in milliseconds since epoch.
    ///
    /// A zero `last_update` falls back to the position fix time.
    pub fn timestamp_millis(&self) -> i64 {
        let secs = if self.last_update != 0.0 {
            self.last_update
        } else {
            self.position.time
        };
        (secs * 1000.0).round() as i64
    }
}

/// Forces `sensors` to be a list of integers, empty when the inbound value is
/// not a list at all. Integral floats such as `2.0` are kept as integers.
fn normalize_sensors(aircraft: &mut Map<String, Value>) {
    let sensors: Vec<Value> = match aircraft.remove("sensors") {
        Some(Value::Array(items)) => {
            let total = items.len();
            let kept: Vec<Value> = items.iter().filter_map(integral).map(Value::from).collect();
            if kept.len() < total {
                log::debug!("Dropped {} non-integer sensor ids", total - kept.len());
            }
            kept
        }
        _ => Vec::new(),
    };
    aircraft.insert("sensors".to_string(), Value::Array(sensors));
}

/// Integer value of a JSON number without a fractional part.
fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        value @ Value::Number(_) => integral(&value).unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_frame() -> Value {
        json!({
            "id": "123",
            "aircraft": {
                "icao24": "abc123",
                "callsign": "TEST123",
                "origin_country": "US",
                "last_contact": 1_700_000_000,
                "squawk": "1234",
                "spi": false,
                "sensors": [1, 2]
            },
            "vector": { "velocity": 500.0, "true_track": 90.0, "vertical_rate": 0.0 },
            "position": {
                "longitude": -122.4194,
                "latitude": 37.7749,
                "geo_altitude": 10000.0,
                "baro_altitude": 10000.0,
                "on_ground": false,
                "source": 1,
                "time": 1_700_000_000
            },
            "last_update": 1_700_000_000
        })
    }

    #[test]
    fn accepts_complete_frame() {
        let ping = PingEnvelope::parse_frame(&sample_frame().to_string()).unwrap();
        assert_eq!(ping.id, "123");
        assert_eq!(ping.identity(), "abc123");
        assert_eq!(ping.aircraft.sensors, vec![1, 2]);
        assert_eq!(ping.position.geo_altitude, 10000.0);
        assert_eq!(ping.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn rejects_frame_without_position() {
        let mut frame = sample_frame();
        frame.as_object_mut().unwrap().remove("position");
        let err = PingEnvelope::parse_frame(&frame.to_string()).unwrap_err();
        assert!(matches!(err, FrameError::MissingField("position")));
    }

    #[test]
    fn rejects_empty_id_and_non_numeric_timestamp() {
        let mut frame = sample_frame();
        frame["id"] = json!("");
        assert!(matches!(
            PingEnvelope::parse_frame(&frame.to_string()),
            Err(FrameError::MissingField("id"))
        ));

        let mut frame = sample_frame();
        frame["last_update"] = json!("1700000000");
        assert!(matches!(
            PingEnvelope::parse_frame(&frame.to_string()),
            Err(FrameError::MissingField("last_update"))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(PingEnvelope::parse_frame("invalid json"), Err(FrameError::Json(_))));
        assert!(matches!(PingEnvelope::parse_frame("[1,2,3]"), Err(FrameError::NotAnObject)));
    }

    #[test]
    fn non_list_sensors_become_empty() {
        let mut frame = sample_frame();
        frame["aircraft"]["sensors"] = json!("not-a-list");
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert!(ping.aircraft.sensors.is_empty());

        frame["aircraft"]["sensors"] = json!([3, "x", 4.5, 7]);
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.aircraft.sensors, vec![3, 7]);
    }

    #[test]
    fn integral_float_sensors_are_kept() {
        let mut frame = sample_frame();
        frame["aircraft"]["sensors"] = json!([1.0, 2.0, 2.5]);
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.aircraft.sensors, vec![1, 2]);
    }

    #[test]
    fn null_and_missing_scalars_take_defaults() {
        let mut frame = sample_frame();
        frame["aircraft"]["callsign"] = Value::Null;
        frame["position"]["baro_altitude"] = Value::Null;
        frame["vector"].as_object_mut().unwrap().remove("vertical_rate");
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.aircraft.callsign, "");
        assert_eq!(ping.position.baro_altitude, 0.0);
        assert_eq!(ping.vector.vertical_rate, 0.0);
    }

    #[test]
    fn mistyped_scalars_are_coerced() {
        let mut frame = sample_frame();
        frame["aircraft"]["squawk"] = json!(7700);
        frame["aircraft"]["spi"] = json!(1);
        frame["position"]["source"] = json!(1.0);
        frame["position"]["geo_altitude"] = json!("11000.5");
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.aircraft.squawk, "7700");
        assert!(ping.aircraft.spi);
        assert_eq!(ping.position.source, 1);
        assert_eq!(ping.position.geo_altitude, 11000.5);
    }

    #[test]
    fn uncoercible_scalars_take_defaults() {
        let mut frame = sample_frame();
        frame["position"]["latitude"] = json!("north");
        frame["aircraft"]["callsign"] = json!({"nested": true});
        frame["position"]["source"] = json!(1.5);
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.position.latitude, 0.0);
        assert_eq!(ping.aircraft.callsign, "");
        assert_eq!(ping.position.source, 0);
        assert_eq!(ping.id, "123");
    }

    #[test]
    fn timestamp_falls_back_to_position_time() {
        let mut frame = sample_frame();
        frame["last_update"] = json!(0);
        frame["position"]["time"] = json!(1_600_000_000.5);
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.timestamp_millis(), 1_600_000_000_500);
    }

    #[test]
    fn identity_falls_back_to_ping_id() {
        let mut frame = sample_frame();
        frame["aircraft"]["icao24"] = Value::Null;
        let ping = PingEnvelope::parse_frame(&frame.to_string()).unwrap();
        assert_eq!(ping.identity(), "123");
    }
}
