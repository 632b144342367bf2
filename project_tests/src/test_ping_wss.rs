use lib_tracker::{ConnectionStatus, MessageHandler, PingEnvelope, StreamTransport, TransportConfig, TransportError};
use project_tests::{FeedBehavior, FeedServer, ping_frame, wait_until};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep};

const WAIT: Duration = Duration::from_secs(5);

fn transport(url: String, reconnect_delay_ms: u64, max_retries: u32) -> StreamTransport {
    StreamTransport::new(TransportConfig::new(url, Duration::from_millis(reconnect_delay_ms), max_retries))
}

/// Handler that records every delivered ping.
fn recorder() -> (MessageHandler, Arc<Mutex<Vec<PingEnvelope>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: MessageHandler = Arc::new(move |ping: &PingEnvelope| sink.lock().unwrap().push(ping.clone()));
    (handler, seen)
}

#[tokio::test]
async fn valid_frame_reaches_each_subscriber_once() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![ping_frame("p1", "abc123", 10000.0, 1_700_000_000)],
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    let (first, first_seen) = recorder();
    let (second, second_seen) = recorder();
    transport.on_message(Arc::clone(&first));
    transport.on_message(Arc::clone(&first));
    transport.on_message(Arc::clone(&second));

    transport.connect();
    assert!(wait_until(WAIT, || second_seen.lock().unwrap().len() == 1).await);
    sleep(Duration::from_millis(100)).await;

    let first_seen = first_seen.lock().unwrap();
    assert_eq!(first_seen.len(), 1, "duplicate registration must not double delivery");
    assert_eq!(first_seen[0].id, "p1");
    assert_eq!(first_seen[0].aircraft.icao24, "abc123");
    assert_eq!(first_seen[0].position.geo_altitude, 10000.0);
    assert_eq!(transport.status(), ConnectionStatus::Connected);

    transport.disconnect();
}

#[tokio::test]
async fn frame_missing_position_never_reaches_subscribers() {
    let missing_position = json!({
        "id": "bad",
        "aircraft": { "icao24": "abc123" },
        "vector": { "velocity": 1.0, "true_track": 0.0, "vertical_rate": 0.0 },
        "last_update": 1_700_000_000
    })
    .to_string();
    let server = FeedServer::start(FeedBehavior {
        frames: vec![
            missing_position,
            "invalid json".to_string(),
            ping_frame("good", "abc123", 9000.0, 1_700_000_000),
        ],
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    let (handler, seen) = recorder();
    transport.on_message(handler);
    transport.connect();

    assert!(wait_until(WAIT, || !seen.lock().unwrap().is_empty()).await);
    sleep(Duration::from_millis(100)).await;

    let ids: Vec<String> = seen.lock().unwrap().iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids, vec!["good".to_string()]);
    transport.disconnect();
}

#[tokio::test]
async fn non_list_sensors_are_delivered_empty() {
    let mut frame: serde_json::Value = serde_json::from_str(&ping_frame("s1", "abc123", 9000.0, 1_700_000_000)).unwrap();
    frame["aircraft"]["sensors"] = json!("not-a-list");
    let server = FeedServer::start(FeedBehavior {
        frames: vec![frame.to_string()],
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    let (handler, seen) = recorder();
    transport.on_message(handler);
    transport.connect();

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1).await);
    assert!(seen.lock().unwrap()[0].aircraft.sensors.is_empty());
    transport.disconnect();
}

#[tokio::test]
async fn retries_stop_after_the_cap() {
    let server = FeedServer::start(FeedBehavior {
        refuse_first: usize::MAX,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    transport.connect();

    // Initial attempt plus three reconnects.
    assert!(wait_until(WAIT, || server.attempts() == 4).await);
    assert!(wait_until(WAIT, || transport.retries_exhausted()).await);
    sleep(Duration::from_millis(500)).await;

    assert_eq!(server.attempts(), 4);
    assert_eq!(transport.retry_count(), 3);
    assert_eq!(transport.status(), ConnectionStatus::Closed);

    // An explicit connect starts over.
    transport.connect();
    assert!(!transport.retries_exhausted());
    assert!(wait_until(WAIT, || server.attempts() == 5).await);
    transport.disconnect();
}

#[tokio::test]
async fn successful_open_resets_retry_counter() {
    let server = FeedServer::start(FeedBehavior {
        refuse_first: 2,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    let mut status = transport.watch_status();
    transport.connect();

    assert!(wait_until(WAIT, || transport.status() == ConnectionStatus::Connected).await);
    assert_eq!(server.attempts(), 3);
    assert_eq!(transport.retry_count(), 0);
    assert!(!transport.retries_exhausted());
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Connected);

    transport.disconnect();
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn server_close_triggers_reconnect() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![ping_frame("p1", "abc123", 10000.0, 1_700_000_000)],
        close_after_frames: true,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 50, 3);
    let (handler, seen) = recorder();
    transport.on_message(handler);
    transport.connect();

    // Every open resets the counter, so the cap is never reached.
    assert!(wait_until(WAIT, || server.attempts() >= 5).await);
    assert!(seen.lock().unwrap().len() >= 4);
    assert!(!transport.retries_exhausted());

    transport.disconnect();
    sleep(Duration::from_millis(100)).await;
    let settled = server.attempts();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.attempts(), settled);
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn disconnect_during_backoff_is_quiescent() {
    let server = FeedServer::start(FeedBehavior {
        refuse_first: usize::MAX,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 300, 3);
    transport.connect();
    assert!(wait_until(WAIT, || transport.status() == ConnectionStatus::Closed).await);

    transport.disconnect();
    sleep(Duration::from_millis(700)).await;

    assert_eq!(server.attempts(), 1);
    assert_eq!(transport.retry_count(), 0);
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_is_delivered_after_disconnect_returns() {
    let frames = (0..20_000)
        .map(|i| ping_frame(&format!("p{i}"), "abc123", 10000.0, 1_700_000_000 + i))
        .collect();
    let server = FeedServer::start(FeedBehavior {
        frames,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    // Slow subscriber so the feed is still streaming at disconnect.
    let handler: MessageHandler = Arc::new(move |_: &PingEnvelope| {
        std::thread::sleep(Duration::from_millis(1));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    transport.on_message(handler);
    transport.connect();

    assert!(wait_until(WAIT, || delivered.load(Ordering::SeqCst) > 50).await);
    transport.disconnect();
    let at_disconnect = delivered.load(Ordering::SeqCst);
    sleep(Duration::from_millis(300)).await;

    assert!(at_disconnect < 20_000);
    assert_eq!(delivered.load(Ordering::SeqCst), at_disconnect);
}

#[tokio::test]
async fn dropping_every_handle_stops_reconnecting() {
    let server = FeedServer::start(FeedBehavior {
        frames: vec![ping_frame("p1", "abc123", 10000.0, 1_700_000_000)],
        close_after_frames: true,
        ..Default::default()
    })
    .await
    .expect("feed server starts");

    let transport = transport(server.url(), 50, 3);
    let other = transport.clone();
    transport.connect();
    assert!(wait_until(WAIT, || server.attempts() >= 2).await);

    drop(transport);
    assert!(wait_until(WAIT, || server.attempts() >= 3).await, "a live clone keeps reconnecting");

    drop(other);
    sleep(Duration::from_millis(100)).await;
    let settled = server.attempts();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.attempts(), settled);
}

#[tokio::test]
async fn connect_is_idempotent() {
    let server = FeedServer::start(FeedBehavior::default()).await.expect("feed server starts");

    let transport = transport(server.url(), 100, 3);
    transport.connect();
    transport.connect();
    assert!(wait_until(WAIT, || transport.status() == ConnectionStatus::Connected).await);
    transport.connect();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(server.attempts(), 1);
    transport.disconnect();
}

#[tokio::test]
async fn send_reaches_server_only_while_connected() {
    let server = FeedServer::start(FeedBehavior::default()).await.expect("feed server starts");
    let transport = transport(server.url(), 100, 3);

    let payload = json!({"type": "subscribe", "bbox": [1, 2, 3, 4]});
    assert!(matches!(transport.send(&payload), Err(TransportError::NotConnected)));

    transport.connect();
    assert!(wait_until(WAIT, || transport.status() == ConnectionStatus::Connected).await);
    transport.send(&payload).expect("send while connected");
    assert!(wait_until(WAIT, || !server.received().is_empty()).await);

    let received: serde_json::Value = serde_json::from_str(&server.received()[0]).unwrap();
    assert_eq!(received, payload);

    transport.disconnect();
    assert!(matches!(transport.send(&payload), Err(TransportError::NotConnected)));
}
