use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use loadwatch_core::{
    LoadingTracker, OverlayActions, OverlayConfig, OverlayHandle, ProxyConfig, ProxyProbe,
    TrackerConfig,
};

/// One playback session: a tracker plus the overlay rendered from it.
///
/// Retry and switch-source actions have no side effect on the server beyond
/// being counted; clients poll the counters and react themselves.
pub struct Session {
    pub tracker: LoadingTracker,
    pub overlay: OverlayHandle,
    pub label: Option<String>,
    retry_requests: Arc<AtomicU32>,
    switch_requests: Arc<AtomicU32>,
}

impl Session {
    pub fn new(tracker_config: TrackerConfig, overlay_config: OverlayConfig, label: Option<String>) -> Self {
        let tracker = LoadingTracker::new(tracker_config);
        let retry_requests = Arc::new(AtomicU32::new(0));
        let switch_requests = Arc::new(AtomicU32::new(0));

        let retries = Arc::clone(&retry_requests);
        let switches = Arc::clone(&switch_requests);
        let actions = OverlayActions::default()
            .on_retry(move || {
                retries.fetch_add(1, Ordering::Relaxed);
            })
            .on_switch_source(move || {
                switches.fetch_add(1, Ordering::Relaxed);
            });
        let overlay = OverlayHandle::spawn(&tracker, overlay_config, actions);

        Self {
            tracker,
            overlay,
            label,
            retry_requests,
            switch_requests,
        }
    }

    pub fn id(&self) -> Uuid {
        self.tracker.id()
    }

    pub fn retry_requests(&self) -> u32 {
        self.retry_requests.load(Ordering::Relaxed)
    }

    pub fn switch_requests(&self) -> u32 {
        self.switch_requests.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<DashMap<Uuid, Arc<Session>>>,
    pub tracker_config: TrackerConfig,
    pub overlay_config: OverlayConfig,
    pub proxy: ProxyConfig,
    pub probe: ProxyProbe,
}

impl AppState {
    pub fn new() -> Self {
        let proxy = ProxyConfig::default();
        Self {
            sessions: Arc::new(DashMap::new()),
            tracker_config: TrackerConfig::default(),
            overlay_config: OverlayConfig::default(),
            probe: ProxyProbe::new(proxy.clone()),
            proxy,
        }
    }

    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn with_overlay_config(mut self, config: OverlayConfig) -> Self {
        self.overlay_config = config;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.probe = ProxyProbe::new(proxy.clone());
        self.proxy = proxy;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
