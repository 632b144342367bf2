//! In-process ping feed used by the integration tests.
//!
//! `FeedServer` listens on `127.0.0.1:0` and plays a scripted behaviour for
//! every incoming connection: refuse the first few before the WebSocket
//! handshake, push a list of text frames, then either hold the socket open or
//! close it.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

#[derive(Debug, Clone, Default)]
pub struct FeedBehavior {
    /// Connections dropped before the handshake. `usize::MAX` refuses all.
    pub refuse_first: usize,
    /// Text frames pushed right after the handshake.
    pub frames: Vec<String>,
    /// Close the socket once the frames are sent instead of holding it.
    pub close_after_frames: bool,
}

pub struct FeedServer {
    addr: SocketAddr,
    attempts: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FeedServer {
    pub async fn start(behavior: FeedBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let attempts = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let attempts = Arc::clone(&attempts);
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < behavior.refuse_first {
                        drop(stream);
                        continue;
                    }
                    let behavior = behavior.clone();
                    let received = Arc::clone(&received);
                    tokio::spawn(async move {
                        let Ok(ws_stream) = accept_async(stream).await else {
                            return;
                        };
                        let (mut write, mut read) = ws_stream.split();
                        for frame in behavior.frames {
                            if write.send(Message::Text(frame.into())).await.is_err() {
                                return;
                            }
                        }
                        if behavior.close_after_frames {
                            let _ = write.close().await;
                            return;
                        }
                        while let Some(Ok(msg)) = read.next().await {
                            if let Message::Text(text) = msg {
                                received.lock().unwrap().push(text.as_str().to_owned());
                            }
                        }
                    });
                }
            })
        };

        Ok(Self {
            addr,
            attempts,
            received,
            task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/map-updates", self.addr)
    }

    /// TCP connections accepted so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Text frames the server has read from clients.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A well-formed ping frame.
pub fn ping_frame(id: &str, icao24: &str, geo_altitude: f64, last_update: i64) -> String {
    json!({
        "id": id,
        "aircraft": {
            "icao24": icao24,
            "callsign": "TEST123",
            "origin_country": "United States",
            "last_contact": last_update,
            "squawk": "1200",
            "spi": false,
            "sensors": [1, 2]
        },
        "vector": { "velocity": 250.0, "true_track": 90.0, "vertical_rate": 0.0 },
        "position": {
            "longitude": -122.4194,
            "latitude": 37.7749,
            "geo_altitude": geo_altitude,
            "baro_altitude": geo_altitude,
            "on_ground": false,
            "source": 0,
            "time": last_update
        },
        "last_update": last_update
    })
    .to_string()
}
