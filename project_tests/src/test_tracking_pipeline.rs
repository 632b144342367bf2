use chrono::DateTime;
use lib_tracker::{FlightCache, ManualClock, MessageHandler, PingEnvelope, StreamTransport, TransportConfig};
use project_tests::{FeedBehavior, FeedServer, ping_frame, wait_until};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

const T0: i64 = 1_700_000_000;
const WAIT: Duration = Duration::from_secs(5);

/// Connects a transport to `server` and forwards every delivered ping into a channel.
fn subscribe(server: &FeedServer) -> (StreamTransport, mpsc::UnboundedReceiver<PingEnvelope>) {
    let transport = StreamTransport::new(TransportConfig::new(server.url(), Duration::from_millis(100), 3));
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: MessageHandler = Arc::new(move |ping: &PingEnvelope| {
        let _ = tx.send(ping.clone());
    });
    transport.on_message(handler);
    transport.connect();
    (transport, rx)
}

async fn next_ping(rx: &mut mpsc::UnboundedReceiver<PingEnvelope>) -> PingEnvelope {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("ping arrives in time")
        .expect("transport still subscribed")
}

#[tokio::test]
async fn flight_expires_after_five_minutes_of_silence() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![ping_frame("p1", "X", 10000.0, T0)],
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let clock = ManualClock::new(DateTime::from_timestamp(T0, 0).unwrap());
    let mut cache = FlightCache::with_clock(clock.clone());
    let (transport, mut rx) = subscribe(&server);

    cache.upsert(&next_ping(&mut rx).await);
    let active: Vec<&str> = cache.active().into_iter().map(|f| f.icao24.as_str()).collect();
    assert_eq!(active, vec!["X"]);

    clock.advance(Duration::from_secs(301));
    cache.evict_stale();

    assert!(cache.active().is_empty());
    assert!(cache.get("X").is_none());
    transport.disconnect();
}

#[tokio::test]
async fn repeated_pings_collapse_into_one_flight() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![
            ping_frame("p1", "abc123", 10000.0, T0),
            ping_frame("p2", "abc123", 15000.0, T0 + 5),
            ping_frame("p3", "abc123", 15000.0, T0 + 10),
            ping_frame("p4", "def456", 3000.0, T0 + 10),
        ],
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let clock = ManualClock::new(DateTime::from_timestamp(T0 + 10, 0).unwrap());
    let mut cache = FlightCache::with_clock(clock);
    let (transport, mut rx) = subscribe(&server);

    for _ in 0..4 {
        cache.upsert(&next_ping(&mut rx).await);
    }

    assert_eq!(cache.len(), 2);
    let flight = cache.get("abc123").expect("abc123 is tracked");
    assert_eq!(flight.geo_altitude, 15000.0);
    assert_eq!(flight.ping_id, "p3");
    assert_eq!(flight.last_update.timestamp(), T0 + 10);
    assert_eq!(flight.heading_cardinal(), "E");
    assert_eq!(cache.active_count(), 2);
    transport.disconnect();
}

#[tokio::test]
async fn cache_survives_reconnects() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![ping_frame("p1", "abc123", 10000.0, T0)],
        close_after_frames: true,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let clock = ManualClock::new(DateTime::from_timestamp(T0, 0).unwrap());
    let mut cache = FlightCache::with_clock(clock);
    let (transport, mut rx) = subscribe(&server);

    // The same ping replayed by every new session still maps to one flight.
    for _ in 0..3 {
        cache.upsert(&next_ping(&mut rx).await);
    }
    assert!(wait_until(WAIT, || server.attempts() >= 3).await);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.active_count(), 1);
    transport.disconnect();
}
