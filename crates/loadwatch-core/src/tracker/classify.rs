//! Heuristic classification of a loading session.
//!
//! Every function here is pure: it reads elapsed whole seconds and the proxy
//! telemetry, never a clock.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;

use super::state::{DisplayState, ProxyStatus};

pub const MSG_READY: &str = "Ready to play...";
pub const MSG_CONNECTING_PROXY: &str = "Connecting to proxy server...";
pub const MSG_RECEIVING_DATA: &str = "Receiving video data, player getting ready...";
pub const MSG_SLOW_STREAM: &str = "Proxy connected, but the video stream is slow. Please be patient...";
pub const MSG_PROXY_WORKING: &str = "Proxy responded, working on fetching the video stream...";
pub const MSG_SLOW_CONNECT: &str = "Proxy connection is slow, still trying to connect...";
pub const MSG_PROXY_RESPONDED: &str = "Proxy server responded, working hard to load...";
pub const MSG_WATCHDOG_NO_RESPONSE: &str = "Proxy server not responding, cannot reach the source";
pub const MSG_TICKER_NO_RESPONSE: &str =
    "Proxy server not responding, check your network or switch source";
pub const MSG_TICKER_TIMEOUT: &str = "Loading is taking too long, the source may be unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoProxyResponse,
    NoStreamData,
    TooManyErrors,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProxyResponse => write!(f, "Proxy server not responding, cannot reach the source"),
            Self::NoStreamData => write!(f, "Proxy connected but no video stream arrived, the source may be unavailable"),
            Self::TooManyErrors => write!(f, "Too many connection errors, the source may be broken"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopeReason {
    ReceivingData,
    ProxyConnected,
    EstablishingConnection,
    PoorConnection,
}

impl fmt::Display for HopeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReceivingData => write!(f, "Receiving video data"),
            Self::ProxyConnected => write!(f, "Proxy connected, fetching the video stream"),
            Self::EstablishingConnection => write!(f, "Establishing connection"),
            Self::PoorConnection => write!(f, "Connection looks poor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureVerdict {
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl FailureVerdict {
    pub fn ok() -> Self {
        Self { failed: false, reason: None }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self { failed: true, reason: Some(reason) }
    }

    /// Human-readable reason, empty when the source looks fine.
    pub fn reason_text(&self) -> String {
        self.reason.map(|r| r.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopeVerdict {
    pub hopeful: bool,
    pub reason: HopeReason,
}

/// Decides whether a loading source looks dead or still worth waiting for.
///
/// The overlay accepts any implementation; [`HeuristicClassifier`] is the default.
pub trait Classifier: Send + Sync {
    fn source_likely_failed(&self, elapsed_secs: u64, proxy: &ProxyStatus) -> FailureVerdict;

    fn loading_hope(&self, elapsed_secs: u64, proxy: &ProxyStatus) -> HopeVerdict;
}

/// Elapsed-time and telemetry heuristics configured by [`TrackerConfig`].
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    config: TrackerConfig,
}

impl HeuristicClassifier {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }
}

impl Classifier for HeuristicClassifier {
    fn source_likely_failed(&self, elapsed_secs: u64, proxy: &ProxyStatus) -> FailureVerdict {
        source_likely_failed(&self.config, elapsed_secs, proxy)
    }

    fn loading_hope(&self, elapsed_secs: u64, proxy: &ProxyStatus) -> HopeVerdict {
        loading_hope(&self.config, elapsed_secs, proxy)
    }
}

pub fn source_likely_failed(config: &TrackerConfig, elapsed_secs: u64, proxy: &ProxyStatus) -> FailureVerdict {
    if elapsed_secs > config.no_response_failure_secs && !proxy.is_responding {
        return FailureVerdict::failed(FailureReason::NoProxyResponse);
    }
    if elapsed_secs > config.no_stream_failure_secs
        && proxy.is_responding
        && proxy.segment_request_count == 0
    {
        return FailureVerdict::failed(FailureReason::NoStreamData);
    }
    if proxy.error_count > config.max_errors {
        return FailureVerdict::failed(FailureReason::TooManyErrors);
    }
    FailureVerdict::ok()
}

pub fn loading_hope(config: &TrackerConfig, elapsed_secs: u64, proxy: &ProxyStatus) -> HopeVerdict {
    let (hopeful, reason) = if proxy.segment_request_count > 0 {
        (true, HopeReason::ReceivingData)
    } else if proxy.is_responding && elapsed_secs < config.responding_hope_secs {
        (true, HopeReason::ProxyConnected)
    } else if elapsed_secs < config.connecting_hope_secs {
        (true, HopeReason::EstablishingConnection)
    } else {
        (false, HopeReason::PoorConnection)
    };
    HopeVerdict { hopeful, reason }
}

/// Picks the display state and message for a generic loading intent.
///
/// A `connecting` intent always means the proxy handshake is under way. A
/// `loading` intent is refined from the proxy telemetry. Anything else passes
/// through unchanged.
pub fn smart_state(
    config: &TrackerConfig,
    base_state: DisplayState,
    base_message: &str,
    elapsed_secs: u64,
    proxy: &ProxyStatus,
) -> (DisplayState, String) {
    match base_state {
        DisplayState::Connecting => (DisplayState::ProxyConnecting, MSG_CONNECTING_PROXY.to_string()),
        DisplayState::Loading => {
            if proxy.is_responding {
                if proxy.segment_request_count > 0 {
                    (DisplayState::Loading, MSG_RECEIVING_DATA.to_string())
                } else if elapsed_secs > config.slow_stream_after_secs {
                    (DisplayState::ProxyResponding, MSG_SLOW_STREAM.to_string())
                } else {
                    (DisplayState::ProxyResponding, MSG_PROXY_WORKING.to_string())
                }
            } else if elapsed_secs > config.slow_connect_after_secs {
                (DisplayState::ProxyConnecting, MSG_SLOW_CONNECT.to_string())
            } else {
                (DisplayState::Loading, base_message.to_string())
            }
        }
        other => (other, base_message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(responding: bool, segments: u32, errors: u32) -> ProxyStatus {
        ProxyStatus {
            is_responding: responding,
            last_response_time: None,
            segment_request_count: segments,
            error_count: errors,
        }
    }

    fn failed(elapsed: u64, proxy: &ProxyStatus) -> FailureVerdict {
        source_likely_failed(&TrackerConfig::default(), elapsed, proxy)
    }

    fn hope(elapsed: u64, proxy: &ProxyStatus) -> HopeVerdict {
        loading_hope(&TrackerConfig::default(), elapsed, proxy)
    }

    #[test]
    fn silent_proxy_fails_after_fifteen_seconds() {
        for elapsed in 16..120 {
            let v = failed(elapsed, &status(false, 0, 0));
            assert_eq!(v, FailureVerdict::failed(FailureReason::NoProxyResponse), "elapsed={}", elapsed);
        }
        assert!(!failed(15, &status(false, 0, 0)).failed);
    }

    #[test]
    fn responding_without_segments_fails_after_twenty_five_seconds() {
        assert!(!failed(25, &status(true, 0, 0)).failed);
        for elapsed in 26..120 {
            let v = failed(elapsed, &status(true, 0, 0));
            assert_eq!(v.reason, Some(FailureReason::NoStreamData), "elapsed={}", elapsed);
        }
    }

    #[test]
    fn no_response_and_no_stream_are_mutually_exclusive() {
        let silent = failed(40, &status(false, 0, 0));
        let connected = failed(40, &status(true, 0, 0));
        assert_eq!(silent.reason, Some(FailureReason::NoProxyResponse));
        assert_eq!(connected.reason, Some(FailureReason::NoStreamData));
    }

    #[test]
    fn too_many_errors_fails_regardless_of_timing() {
        for elapsed in [0, 5, 14, 30] {
            let v = failed(elapsed, &status(true, 3, 6));
            assert_eq!(v, FailureVerdict::failed(FailureReason::TooManyErrors));
        }
        assert!(!failed(0, &status(true, 3, 5)).failed);
    }

    #[test]
    fn earlier_branch_wins_over_error_count() {
        let v = failed(20, &status(false, 0, 9));
        assert_eq!(v.reason, Some(FailureReason::NoProxyResponse));
    }

    #[test]
    fn ok_verdict_has_empty_reason() {
        let v = failed(3, &status(false, 0, 0));
        assert!(!v.failed);
        assert_eq!(v.reason_text(), "");
    }

    #[test]
    fn segments_always_mean_hope() {
        for elapsed in [0, 19, 20, 300] {
            for responding in [true, false] {
                let v = hope(elapsed, &status(responding, 1, 50));
                assert!(v.hopeful);
                assert_eq!(v.reason, HopeReason::ReceivingData);
            }
        }
    }

    #[test]
    fn responding_proxy_is_hopeful_below_twenty_seconds() {
        assert_eq!(hope(19, &status(true, 0, 0)).reason, HopeReason::ProxyConnected);
        let late = hope(20, &status(true, 0, 0));
        assert!(!late.hopeful);
        assert_eq!(late.reason, HopeReason::PoorConnection);
    }

    #[test]
    fn early_connection_is_hopeful() {
        assert_eq!(hope(9, &status(false, 0, 0)).reason, HopeReason::EstablishingConnection);
        assert!(!hope(10, &status(false, 0, 0)).hopeful);
    }

    #[test]
    fn connecting_intent_becomes_proxy_connecting() {
        let config = TrackerConfig::default();
        let (state, message) = smart_state(&config, DisplayState::Connecting, "Connecting...", 0, &status(false, 0, 0));
        assert_eq!(state, DisplayState::ProxyConnecting);
        assert_eq!(message, MSG_CONNECTING_PROXY);
    }

    #[test]
    fn loading_intent_precedence() {
        let config = TrackerConfig::default();
        let run = |elapsed, proxy: ProxyStatus| smart_state(&config, DisplayState::Loading, "Loading...", elapsed, &proxy);

        assert_eq!(run(30, status(true, 2, 0)), (DisplayState::Loading, MSG_RECEIVING_DATA.to_string()));
        assert_eq!(run(9, status(true, 0, 0)), (DisplayState::ProxyResponding, MSG_SLOW_STREAM.to_string()));
        assert_eq!(run(8, status(true, 0, 0)), (DisplayState::ProxyResponding, MSG_PROXY_WORKING.to_string()));
        assert_eq!(run(6, status(false, 0, 0)), (DisplayState::ProxyConnecting, MSG_SLOW_CONNECT.to_string()));
        assert_eq!(run(5, status(false, 0, 0)), (DisplayState::Loading, "Loading...".to_string()));
    }

    #[test]
    fn other_intents_pass_through() {
        let config = TrackerConfig::default();
        let (state, message) = smart_state(&config, DisplayState::Buffering, "Buffering", 40, &status(true, 4, 0));
        assert_eq!(state, DisplayState::Buffering);
        assert_eq!(message, "Buffering");
    }

    #[test]
    fn heuristic_classifier_uses_custom_thresholds() {
        let classifier = HeuristicClassifier::new(TrackerConfig::default().with_max_errors(1));
        let v = classifier.source_likely_failed(0, &status(true, 1, 2));
        assert_eq!(v.reason, Some(FailureReason::TooManyErrors));
    }
}
