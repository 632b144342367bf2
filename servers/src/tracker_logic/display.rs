use colored::{ColoredString, Colorize};
use lib_tracker::{ConnectionStatus, FlightEntity};

/// Status text coloured green when connected, yellow while connecting and red
/// for everything else.
pub fn status_badge(status: ConnectionStatus) -> ColoredString {
    match status {
        ConnectionStatus::Connected => status.as_str().green().bold(),
        ConnectionStatus::Connecting => status.as_str().yellow().bold(),
        _ => status.as_str().red().bold(),
    }
}

pub fn flight_line(flight: &FlightEntity) -> String {
    let callsign = match flight.callsign.trim() {
        "" => "-",
        trimmed => trimmed,
    };
    format!(
        "{:<8} {:<8} {:>7.0} m {:>5.0} m/s {:<2} {:>9.4},{:>10.4} {}{}",
        flight.icao24,
        callsign,
        flight.geo_altitude,
        flight.velocity,
        flight.heading_cardinal(),
        flight.latitude,
        flight.longitude,
        flight.origin_country,
        if flight.on_ground { " [ground]" } else { "" },
    )
}

pub fn summary_line(status: ConnectionStatus, active: usize, tracked: usize) -> String {
    format!("[{}] {} active / {} tracked flights", status_badge(status), active, tracked)
}

/// Logged once when the transport stops reconnecting on its own.
pub fn exhaustion_notice(max_retries: u32) -> String {
    format!(
        "Ping feed gave up after {} reconnect attempts; no further data until reconnect is requested.",
        max_retries
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_tracker::{Aircraft, PingEnvelope, Position, Vector};

    fn flight(callsign: &str, on_ground: bool) -> FlightEntity {
        FlightEntity::from_envelope(&PingEnvelope {
            id: "1".to_string(),
            aircraft: Aircraft {
                icao24: "4ca7b5".to_string(),
                callsign: callsign.to_string(),
                origin_country: "Ireland".to_string(),
                ..Default::default()
            },
            vector: Vector {
                velocity: 231.4,
                true_track: 92.0,
                vertical_rate: 0.0,
            },
            position: Position {
                latitude: 53.4213,
                longitude: -6.2701,
                geo_altitude: 10972.8,
                on_ground,
                ..Default::default()
            },
            last_update: 1_700_000_000.0,
        })
    }

    #[test]
    fn flight_line_shows_key_fields() {
        let line = flight("RYR12A  ", false);
        let line = flight_line(&line);
        assert!(line.starts_with("4ca7b5   RYR12A"));
        assert!(line.contains("10973 m"));
        assert!(line.contains(" E "));
        assert!(line.ends_with("Ireland"));
    }

    #[test]
    fn blank_callsign_and_ground_flag() {
        let line = flight_line(&flight("   ", true));
        assert!(line.contains(" - "));
        assert!(line.ends_with("[ground]"));
    }

    #[test]
    fn exhaustion_notice_points_at_reconnect() {
        let notice = exhaustion_notice(10);
        assert!(notice.contains("after 10 reconnect attempts"));
        assert!(notice.ends_with("until reconnect is requested."));
        assert!(!notice.contains("restart"));
    }

    #[test]
    fn badge_text_matches_status() {
        colored::control::set_override(false);
        assert_eq!(status_badge(ConnectionStatus::Connected).to_string(), "CONNECTED");
        assert_eq!(status_badge(ConnectionStatus::Closed).to_string(), "CLOSED");
        assert_eq!(
            summary_line(ConnectionStatus::Connecting, 2, 5),
            "[CONNECTING] 2 active / 5 tracked flights"
        );
    }
}
