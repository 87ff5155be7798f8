use chrono::Utc;
use tokio::time::Instant;

use crate::config::TrackerConfig;

use super::classify::{
    smart_state, Classifier, FailureVerdict, HopeVerdict, MSG_PROXY_RESPONDED, MSG_READY,
    MSG_TICKER_NO_RESPONSE, MSG_TICKER_TIMEOUT, MSG_WATCHDOG_NO_RESPONSE,
};
use super::state::{DisplayState, LoadingSnapshot, ProxyStatus};

/// Synchronous loading-session state machine.
///
/// Owns no timers. Every operation takes the current instant, and the session
/// exposes whether its clock runs and when its watchdog is due so that an owner
/// can schedule the matching timers.
#[derive(Debug, Clone)]
pub struct LoadingSession {
    config: TrackerConfig,
    state: DisplayState,
    message: String,
    started_at: Option<Instant>,
    clock_running: bool,
    /// Display value frozen when the clock stops.
    elapsed_secs: u64,
    proxy: ProxyStatus,
    watchdog_deadline: Option<Instant>,
}

impl LoadingSession {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: DisplayState::Idle,
            message: MSG_READY.to_string(),
            started_at: None,
            clock_running: false,
            elapsed_secs: 0,
            proxy: ProxyStatus::default(),
            watchdog_deadline: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn proxy(&self) -> &ProxyStatus {
        &self.proxy
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn clock_running(&self) -> bool {
        self.clock_running
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_deadline
    }

    /// Whole seconds since the session started, or the frozen value once the clock stopped.
    pub fn elapsed_secs(&self, now: Instant) -> u64 {
        match (self.clock_running, self.started_at) {
            (true, Some(start)) => now.saturating_duration_since(start).as_secs(),
            _ => self.elapsed_secs,
        }
    }

    /// Whole seconds since the session started, even after the clock stopped.
    /// Classification always ages with the wall clock; 0 before the first start.
    pub fn classify_elapsed(&self, now: Instant) -> u64 {
        self.started_at
            .map(|start| now.saturating_duration_since(start).as_secs())
            .unwrap_or(0)
    }

    pub fn update_state(&mut self, state: DisplayState, message: impl Into<String>, now: Instant) {
        if state.is_terminal() {
            self.elapsed_secs = self.elapsed_secs(now);
            self.clock_running = false;
        } else {
            if self.started_at.is_none() {
                self.started_at = Some(now);
                self.elapsed_secs = 0;
            }
            self.clock_running = true;
        }

        self.watchdog_deadline = if state.is_connecting() {
            Some(now + self.config.no_response_timeout)
        } else {
            None
        };

        self.state = state;
        self.message = message.into();
    }

    pub fn smart_update_state(&mut self, base_state: DisplayState, base_message: &str, now: Instant) {
        let elapsed = self.classify_elapsed(now);
        let (state, message) = smart_state(&self.config, base_state, base_message, elapsed, &self.proxy);
        self.update_state(state, message, now);
    }

    pub fn record_proxy_response(&mut self, now: Instant) {
        self.proxy.is_responding = true;
        self.proxy.last_response_time = Some(Utc::now());
        self.watchdog_deadline = None;

        if self.state == DisplayState::ProxyConnecting {
            self.update_state(DisplayState::ProxyResponding, MSG_PROXY_RESPONDED, now);
        }
    }

    pub fn record_segment_request(&mut self, now: Instant) {
        self.proxy.segment_request_count = self.proxy.segment_request_count.saturating_add(1);
        self.record_proxy_response(now);
    }

    pub fn record_error(&mut self) {
        self.proxy.error_count = self.proxy.error_count.saturating_add(1);
    }

    /// Refreshes the elapsed time and applies the hard timeout. Returns true
    /// when the tick forced a terminal state.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.clock_running {
            return false;
        }
        let elapsed = self.elapsed_secs(now);
        self.elapsed_secs = elapsed;

        if elapsed <= self.config.force_terminal_after_secs
            || matches!(self.state, DisplayState::Error | DisplayState::Success)
        {
            return false;
        }

        if !self.proxy.is_responding {
            self.update_state(DisplayState::NoResponse, MSG_TICKER_NO_RESPONSE, now);
            true
        } else if self.proxy.segment_request_count == 0 {
            self.update_state(DisplayState::Timeout, MSG_TICKER_TIMEOUT, now);
            true
        } else {
            false
        }
    }

    /// Fires the no-response watchdog if it is due. Returns true when the
    /// session was forced to `noResponse`.
    pub fn watchdog_expired(&mut self, now: Instant) -> bool {
        match self.watchdog_deadline {
            Some(deadline) if now >= deadline => {
                self.watchdog_deadline = None;
                if self.proxy.is_responding {
                    return false;
                }
                self.update_state(DisplayState::NoResponse, MSG_WATCHDOG_NO_RESPONSE, now);
                true
            }
            _ => false,
        }
    }

    pub fn failure_verdict(&self, classifier: &dyn Classifier, now: Instant) -> FailureVerdict {
        classifier.source_likely_failed(self.classify_elapsed(now), &self.proxy)
    }

    pub fn hope_verdict(&self, classifier: &dyn Classifier, now: Instant) -> HopeVerdict {
        classifier.loading_hope(self.classify_elapsed(now), &self.proxy)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn snapshot(&self, now: Instant) -> LoadingSnapshot {
        LoadingSnapshot {
            state: self.state,
            message: self.message.clone(),
            elapsed_secs: self.elapsed_secs(now),
            clock_running: self.clock_running,
            proxy: self.proxy.clone(),
        }
    }
}
