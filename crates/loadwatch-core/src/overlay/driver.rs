use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::config::OverlayConfig;
use crate::tracker::{LoadingSnapshot, LoadingTracker};

use super::model::{LoadingOverlay, OverlayActions};
use super::view::{ActionKind, OverlayView};

/// A [`LoadingOverlay`] kept live against one tracker.
///
/// The background task re-renders on every published snapshot and wakes on
/// its own for pending reveals, so the smart suggestion is consulted on time
/// even when nobody is looking. It stops when the tracker or the handle is
/// dropped.
pub struct OverlayHandle {
    model: Arc<Mutex<LoadingOverlay>>,
    snapshots: watch::Receiver<LoadingSnapshot>,
    views: watch::Receiver<OverlayView>,
    task: JoinHandle<()>,
}

impl OverlayHandle {
    /// Attaches an overlay using the tracker's own classifier.
    pub fn spawn(tracker: &LoadingTracker, config: OverlayConfig, actions: OverlayActions) -> Self {
        let overlay =
            LoadingOverlay::with_classifier(config, tracker.classifier()).with_actions(actions);
        Self::attach(overlay, tracker.subscribe())
    }

    pub fn attach(mut overlay: LoadingOverlay, mut snapshots: watch::Receiver<LoadingSnapshot>) -> Self {
        let snapshot = snapshots.borrow_and_update().clone();
        let (tx, views) = watch::channel(overlay.view(&snapshot, Instant::now()));
        let model = Arc::new(Mutex::new(overlay));
        let task = tokio::spawn(run_overlay(Arc::clone(&model), snapshots.clone(), tx));
        Self {
            model,
            snapshots,
            views,
            task,
        }
    }

    /// Renders the latest snapshot as of now.
    pub fn current(&self) -> OverlayView {
        let snapshot = self.snapshots.borrow().clone();
        lock(&self.model).view(&snapshot, Instant::now())
    }

    /// Views published by the background task, one per visible change.
    pub fn subscribe(&self) -> watch::Receiver<OverlayView> {
        self.views.clone()
    }

    /// Invokes the action's callback if the current view offers it.
    pub fn trigger(&self, kind: ActionKind) -> bool {
        let view = self.current();
        lock(&self.model).trigger(&view, kind)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for OverlayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(model: &Mutex<LoadingOverlay>) -> MutexGuard<'_, LoadingOverlay> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_overlay(
    model: Arc<Mutex<LoadingOverlay>>,
    mut snapshots: watch::Receiver<LoadingSnapshot>,
    views: watch::Sender<OverlayView>,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        let (view, deadline) = {
            let mut overlay = lock(&model);
            let view = overlay.view(&snapshot, Instant::now());
            (view, overlay.next_deadline())
        };
        views.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    debug!("Tracker gone, stopping overlay");
                    break;
                }
            }
            _ = wait_until(deadline) => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
