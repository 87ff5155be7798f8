use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds driving the loading-state tracker and its classifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Interval between elapsed-time refreshes while the clock runs (default: 1s).
    pub tick_interval: Duration,
    /// How long a connecting state may wait for a proxy response before
    /// being forced to `noResponse` (default: 10s).
    pub no_response_timeout: Duration,
    /// Elapsed seconds after which the ticker forces a terminal state (default: 30).
    pub force_terminal_after_secs: u64,
    /// Elapsed seconds after which a silent proxy is reported as a slow connect.
    pub slow_connect_after_secs: u64,
    /// Elapsed seconds after which a responding proxy without segments is a slow stream.
    pub slow_stream_after_secs: u64,
    /// Elapsed seconds without any proxy response before the source is likely failed.
    pub no_response_failure_secs: u64,
    /// Elapsed seconds with a response but no segments before the source is likely failed.
    pub no_stream_failure_secs: u64,
    /// Error count above which the source is likely failed regardless of timing.
    pub max_errors: u32,
    /// A responding proxy stays hopeful below this many elapsed seconds.
    pub responding_hope_secs: u64,
    /// Any session stays hopeful below this many elapsed seconds.
    pub connecting_hope_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            no_response_timeout: Duration::from_secs(10),
            force_terminal_after_secs: 30,
            slow_connect_after_secs: 5,
            slow_stream_after_secs: 8,
            no_response_failure_secs: 15,
            no_stream_failure_secs: 25,
            max_errors: 5,
            responding_hope_secs: 20,
            connecting_hope_secs: 10,
        }
    }
}

impl TrackerConfig {
    pub fn with_tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_no_response_timeout(mut self, ms: u64) -> Self {
        self.no_response_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_force_terminal_after(mut self, secs: u64) -> Self {
        self.force_terminal_after_secs = secs;
        self
    }

    pub fn with_slow_connect_after(mut self, secs: u64) -> Self {
        self.slow_connect_after_secs = secs;
        self
    }

    pub fn with_slow_stream_after(mut self, secs: u64) -> Self {
        self.slow_stream_after_secs = secs;
        self
    }

    pub fn with_failure_thresholds(mut self, no_response_secs: u64, no_stream_secs: u64) -> Self {
        self.no_response_failure_secs = no_response_secs;
        self.no_stream_failure_secs = no_stream_secs;
        self
    }

    pub fn with_max_errors(mut self, max: u32) -> Self {
        self.max_errors = max;
        self
    }

    pub fn with_hope_thresholds(mut self, responding_secs: u64, connecting_secs: u64) -> Self {
        self.responding_hope_secs = responding_secs;
        self.connecting_hope_secs = connecting_secs;
        self
    }
}

/// Reveal delays for the loading overlay, measured from entry into an active loading phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub extended_message_after: Duration,
    pub smart_suggestion_after: Duration,
    /// Timeout warning delay while the proxy has not responded.
    pub timeout_warning_after: Duration,
    /// Timeout warning delay once the proxy responds but no segment was requested.
    pub timeout_warning_responding_after: Duration,
    /// Timeout warning delay once segments are flowing.
    pub timeout_warning_streaming_after: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            extended_message_after: Duration::from_secs(3),
            smart_suggestion_after: Duration::from_secs(12),
            timeout_warning_after: Duration::from_secs(15),
            timeout_warning_responding_after: Duration::from_secs(18),
            timeout_warning_streaming_after: Duration::from_secs(25),
        }
    }
}

impl OverlayConfig {
    pub fn with_extended_message_after(mut self, ms: u64) -> Self {
        self.extended_message_after = Duration::from_millis(ms);
        self
    }

    pub fn with_smart_suggestion_after(mut self, ms: u64) -> Self {
        self.smart_suggestion_after = Duration::from_millis(ms);
        self
    }

    pub fn with_timeout_warnings(mut self, default_ms: u64, responding_ms: u64, streaming_ms: u64) -> Self {
        self.timeout_warning_after = Duration::from_millis(default_ms);
        self.timeout_warning_responding_after = Duration::from_millis(responding_ms);
        self.timeout_warning_streaming_after = Duration::from_millis(streaming_ms);
        self
    }
}
