//! Glue between the ping feed and the flight cache.
//!
//! The coordinator owns the `FlightCache`. Transport handlers only push pings
//! into a channel, so every cache access happens on the coordinator's task.

use std::sync::Arc;
use std::time::Duration;

use lib_tracker::{
    Clock, ConnectionStatus, FlightCache, MessageHandler, PingEnvelope, StreamTransport, SystemClock,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

use crate::tracker_logic::config::TrackerSettings;
use crate::tracker_logic::display;

pub struct Coordinator<C: Clock = SystemClock> {
    transport: StreamTransport,
    cache: FlightCache<C>,
    status_interval: Duration,
    eviction_interval: Duration,
    last_status: Option<ConnectionStatus>,
    reported_exhaustion: bool,
    /// Identities of the active flights as last shown, sorted.
    visible: Vec<String>,
}

impl<C: Clock> Coordinator<C> {
    pub fn new(transport: StreamTransport, cache: FlightCache<C>, settings: &TrackerSettings) -> Self {
        Self {
            transport,
            cache,
            status_interval: settings.status_interval,
            eviction_interval: settings.eviction_interval,
            last_status: None,
            reported_exhaustion: false,
            visible: Vec::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<PingEnvelope>();
        let handler: MessageHandler = Arc::new(move |ping: &PingEnvelope| {
            let _ = ping_tx.send(ping.clone());
        });
        self.transport.on_message(Arc::clone(&handler));

        let mut status_tick = interval(self.status_interval);
        let mut eviction_tick = interval(self.eviction_interval);
        // Both intervals fire immediately; the first sweep has nothing to do.
        eviction_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Coordinator received shutdown signal.");
                    break;
                }
                Some(ping) = ping_rx.recv() => self.handle_ping(&ping),
                _ = status_tick.tick() => self.on_status_tick(),
                _ = eviction_tick.tick() => self.on_eviction_tick(),
            }
        }

        self.transport.off_message(&handler);
        log::info!("{}", display::summary_line(self.transport.status(), self.visible.len(), self.cache.len()));
    }

    pub fn handle_ping(&mut self, ping: &PingEnvelope) {
        self.cache.upsert(ping);
        self.refresh_view();
    }

    pub fn on_status_tick(&mut self) {
        let status = self.transport.status();
        if self.last_status != Some(status) {
            log::info!("Connection status: {}", display::status_badge(status));
            self.last_status = Some(status);
        }

        let exhausted = self.transport.retries_exhausted();
        if exhausted && !self.reported_exhaustion {
            log::warn!("{}", display::exhaustion_notice(self.transport.config().max_retries));
        }
        self.reported_exhaustion = exhausted;
    }

    pub fn on_eviction_tick(&mut self) {
        let evicted = self.cache.evict_stale_count();
        self.refresh_view();

        let status = self.last_status.unwrap_or_else(|| self.transport.status());
        log::info!(
            "{} ({} evicted)",
            display::summary_line(status, self.visible.len(), self.cache.len()),
            evicted
        );
        for flight in self.visible.iter().filter_map(|id| self.cache.get(id)) {
            log::debug!("{}", display::flight_line(flight));
        }
    }

    fn refresh_view(&mut self) {
        let mut ids: Vec<String> = self.cache.active().into_iter().map(|f| f.icao24.clone()).collect();
        ids.sort_unstable();
        self.visible = ids;
    }
}
