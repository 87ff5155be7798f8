use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TrackerConfig;

use super::classify::{Classifier, FailureVerdict, HeuristicClassifier, HopeVerdict};
use super::session::LoadingSession;
use super::state::{DisplayState, LoadingSnapshot};

/// Timers owned by one tracker. Every handle is aborted when it stops
/// applying and when the set is dropped.
#[derive(Default)]
struct TimerSet {
    ticker: Option<JoinHandle<()>>,
    watchdog: Option<(Instant, JoinHandle<()>)>,
}

impl TimerSet {
    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn cancel_watchdog(&mut self) {
        if let Some((_, handle)) = self.watchdog.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_ticker();
        self.cancel_watchdog();
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

struct TrackerInner {
    session: LoadingSession,
    timers: TimerSet,
}

struct Shared {
    tracker_id: Uuid,
    inner: Mutex<TrackerInner>,
    updates: watch::Sender<LoadingSnapshot>,
}

/// Loading-state tracker for one playback session.
///
/// Wraps a [`LoadingSession`] with its background ticker and no-response
/// watchdog. Recording calls and timer callbacks serialize on one lock, and
/// every change is published to [`LoadingTracker::subscribe`] receivers.
pub struct LoadingTracker {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: TrackerConfig,
    classifier: Arc<dyn Classifier>,
    shared: Arc<Shared>,
}

impl LoadingTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let classifier = Arc::new(HeuristicClassifier::new(config.clone()));
        Self::with_classifier(config, classifier)
    }

    pub fn with_classifier(config: TrackerConfig, classifier: Arc<dyn Classifier>) -> Self {
        let session = LoadingSession::new(config.clone());
        let (updates, _) = watch::channel(session.snapshot(Instant::now()));
        let id = Uuid::new_v4();
        Self {
            id,
            created_at: Utc::now(),
            config,
            classifier,
            shared: Arc::new(Shared {
                tracker_id: id,
                inner: Mutex::new(TrackerInner {
                    session,
                    timers: TimerSet::default(),
                }),
                updates,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.classifier)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadingSnapshot> {
        self.shared.updates.subscribe()
    }

    pub async fn snapshot(&self) -> LoadingSnapshot {
        let inner = self.shared.inner.lock().await;
        inner.session.snapshot(Instant::now())
    }

    pub async fn update_state(&self, state: DisplayState, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|session, now| session.update_state(state, message, now)).await;
    }

    pub async fn smart_update_state(&self, base_state: DisplayState, base_message: &str) {
        self.mutate(|session, now| session.smart_update_state(base_state, base_message, now))
            .await;
    }

    pub async fn record_proxy_response(&self) {
        self.mutate(|session, now| session.record_proxy_response(now)).await;
    }

    pub async fn record_segment_request(&self) {
        self.mutate(|session, now| session.record_segment_request(now)).await;
    }

    pub async fn record_error(&self) {
        self.mutate(|session, _| session.record_error()).await;
    }

    pub async fn is_source_likely_failed(&self) -> FailureVerdict {
        let inner = self.shared.inner.lock().await;
        inner.session.failure_verdict(self.classifier.as_ref(), Instant::now())
    }

    pub async fn has_loading_hope(&self) -> HopeVerdict {
        let inner = self.shared.inner.lock().await;
        inner.session.hope_verdict(self.classifier.as_ref(), Instant::now())
    }

    pub async fn reset(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.timers.cancel_all();
        inner.session.reset();
        self.shared.updates.send_replace(inner.session.snapshot(Instant::now()));
        debug!(tracker_id = %self.id, "Loading state reset");
    }

    /// Cancels all pending timers without touching the session state.
    pub async fn shutdown(&self) {
        self.shared.inner.lock().await.timers.cancel_all();
    }

    async fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut LoadingSession, Instant),
    {
        let mut inner = self.shared.inner.lock().await;
        let now = Instant::now();
        let before = inner.session.state();
        f(&mut inner.session, now);
        let after = inner.session.state();
        if before != after {
            debug!(
                tracker_id = %self.id,
                from = %before,
                to = %after,
                message = inner.session.message(),
                "Loading state changed"
            );
        }
        sync_timers(&self.shared, &mut inner);
        self.shared.updates.send_replace(inner.session.snapshot(now));
    }
}

/// Brings the owned timers in line with what the session currently needs.
fn sync_timers(shared: &Arc<Shared>, inner: &mut TrackerInner) {
    if inner.session.clock_running() {
        if inner.timers.ticker.is_none() {
            let tick = inner.session.config().tick_interval;
            inner.timers.ticker = Some(tokio::spawn(run_ticker(Arc::downgrade(shared), tick)));
        }
    } else {
        inner.timers.cancel_ticker();
    }

    match (inner.session.watchdog_deadline(), &inner.timers.watchdog) {
        (Some(deadline), Some((armed, _))) if *armed == deadline => {}
        (Some(deadline), _) => {
            inner.timers.cancel_watchdog();
            let handle = tokio::spawn(run_watchdog(Arc::downgrade(shared), deadline));
            inner.timers.watchdog = Some((deadline, handle));
        }
        (None, _) => inner.timers.cancel_watchdog(),
    }
}

async fn run_ticker(shared: Weak<Shared>, tick: std::time::Duration) {
    let mut interval = time::interval_at(Instant::now() + tick, tick);
    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let mut inner = shared.inner.lock().await;
        let now = Instant::now();
        if inner.session.tick(now) {
            info!(
                tracker_id = %shared.tracker_id,
                state = %inner.session.state(),
                elapsed_secs = inner.session.elapsed_secs(now),
                "Loading timed out"
            );
        }
        shared.updates.send_replace(inner.session.snapshot(now));

        if !inner.session.clock_running() {
            // Detach our own handle so sync_timers does not abort this task.
            inner.timers.ticker.take();
            sync_timers(&shared, &mut inner);
            break;
        }
    }
}

async fn run_watchdog(shared: Weak<Shared>, deadline: Instant) {
    time::sleep_until(deadline).await;
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut inner = shared.inner.lock().await;
    if inner.timers.watchdog.as_ref().map(|(armed, _)| *armed) != Some(deadline) {
        return;
    }
    inner.timers.watchdog.take();

    let now = Instant::now();
    if inner.session.watchdog_expired(now) {
        info!(
            tracker_id = %shared.tracker_id,
            elapsed_secs = inner.session.elapsed_secs(now),
            "No proxy response before watchdog expiry"
        );
        sync_timers(&shared, &mut inner);
        shared.updates.send_replace(inner.session.snapshot(now));
    }
}
