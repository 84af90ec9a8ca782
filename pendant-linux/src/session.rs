//! Connected-device session: one PendantCore behind a mutex, plus the periodic eviction sweep.
//!
//! Notification handling and the sweep both take the same lock, so a sweep never sees a
//! half-inserted packet and an insertion never revives a frame the sweep just evicted.

use std::sync::Arc;
use std::time::Duration;

use pendant_core::{Event, PendantCore, ReassemblyMetrics};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub type SharedCore = Arc<Mutex<PendantCore>>;

pub struct Session {
    core: SharedCore,
    events: UnboundedSender<Event>,
    sweeper: Option<JoinHandle<()>>,
}

impl Session {
    /// Take ownership of `core` and start sweeping every `sweep_interval`. Events go to `events`.
    pub fn connect(
        core: PendantCore,
        sweep_interval: Duration,
        events: UnboundedSender<Event>,
    ) -> Self {
        let core = Arc::new(Mutex::new(core));
        let sweeper = tokio::spawn(sweep_loop(core.clone(), sweep_interval, events.clone()));
        info!(interval_ms = sweep_interval.as_millis() as u64, "session connected");
        Self {
            core,
            events,
            sweeper: Some(sweeper),
        }
    }

    pub fn core(&self) -> SharedCore {
        self.core.clone()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Feed one notification and forward resulting events. Returns how many were produced.
    pub async fn on_notification(&self, data: &[u8]) -> usize {
        let now = Instant::now().into_std();
        let events = self.core.lock().await.on_notification_at(data, now);
        let n = events.len();
        for event in events {
            if self.events.send(event).is_err() {
                debug!("event receiver gone, dropping event");
            }
        }
        n
    }

    /// Outbound writes for stream start, in order.
    pub async fn start_stream(&self, unix_ms: u64) -> Vec<Vec<u8>> {
        self.core.lock().await.start_stream(unix_ms)
    }

    pub async fn metrics(&self) -> ReassemblyMetrics {
        self.core.lock().await.metrics().clone()
    }

    /// Stop the sweep timer, then drop in-flight state and zero the codec counters.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.core.lock().await.reset();
        info!("session disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

async fn sweep_loop(core: SharedCore, interval: Duration, events: UnboundedSender<Event>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = Instant::now().into_std();
        let evicted = core.lock().await.tick_at(now);
        if !evicted.is_empty() {
            debug!(events = evicted.len(), "sweep evicted frames");
        }
        for event in evicted {
            if events.send(event).is_err() {
                debug!("event receiver gone, stopping sweep");
                return;
            }
        }
    }
}
