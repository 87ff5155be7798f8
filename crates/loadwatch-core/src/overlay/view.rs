//! Render-ready description of the loading overlay.
//!
//! Everything here is a pure function of a [`LoadingSnapshot`] plus the
//! overlay's reveal flags. Frontends draw an [`OverlayView`] however they like.

use serde::{Deserialize, Serialize};

use crate::tracker::{DisplayState, FailureVerdict, HopeVerdict, LoadingSnapshot, ProxyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayIcon {
    Idle,
    Connecting,
    Responding,
    Loading,
    Success,
    Failure,
}

impl OverlayIcon {
    pub fn for_state(state: DisplayState) -> Self {
        match state {
            DisplayState::Connecting | DisplayState::ProxyConnecting => Self::Connecting,
            DisplayState::ProxyResponding => Self::Responding,
            DisplayState::Loading | DisplayState::Buffering => Self::Loading,
            DisplayState::Success | DisplayState::Playing => Self::Success,
            DisplayState::Error | DisplayState::Timeout | DisplayState::NoResponse => Self::Failure,
            DisplayState::Idle => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressTone {
    /// The proxy has answered.
    Active,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub tone: ProgressTone,
}

impl Progress {
    /// Phase-clamped progress, `None` outside the active states.
    pub fn for_snapshot(state: DisplayState, elapsed_secs: u64, proxy: &ProxyStatus) -> Option<Self> {
        let t = elapsed_secs;
        let segments = u64::from(proxy.segment_request_count);
        let percent = match state {
            DisplayState::Connecting | DisplayState::ProxyConnecting => t.saturating_mul(2).min(25),
            DisplayState::ProxyResponding => t.saturating_add(25).min(45),
            DisplayState::Loading if segments > 0 => segments.saturating_mul(5).saturating_add(45).min(70),
            DisplayState::Loading => t.saturating_add(45).min(60),
            DisplayState::Buffering => t.saturating_add(60).min(90),
            _ => return None,
        };
        let tone = if proxy.is_responding {
            ProgressTone::Active
        } else {
            ProgressTone::Pending
        };
        Some(Self {
            percent: percent as u8,
            tone,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamIndicator {
    Streaming,
    Waiting,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub indicator: StreamIndicator,
    pub text: String,
}

impl StatusLine {
    pub fn for_proxy(proxy: &ProxyStatus) -> Self {
        if proxy.segment_request_count > 0 {
            Self {
                indicator: StreamIndicator::Streaming,
                text: format!("Playing (segments: {})", proxy.segment_request_count),
            }
        } else if proxy.is_responding {
            Self {
                indicator: StreamIndicator::Waiting,
                text: "Proxy connected, waiting for video stream".to_string(),
            }
        } else {
            Self {
                indicator: StreamIndicator::Offline,
                text: "Connecting".to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    /// The classifier judged the source dead.
    Critical,
    Caution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub severity: WarningSeverity,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retry,
    SwitchSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlayAction {
    pub kind: ActionKind,
    pub emphasized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayView {
    pub state: DisplayState,
    pub icon: OverlayIcon,
    pub message: String,
    pub elapsed_label: Option<String>,
    pub progress: Option<Progress>,
    pub status: StatusLine,
    pub extended_message: Option<String>,
    pub warning: Option<Warning>,
    pub actions: Vec<OverlayAction>,
}

impl OverlayView {
    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind == kind)
    }
}

/// `m:ss`, or `None` before the first second.
pub fn elapsed_label(elapsed_secs: u64) -> Option<String> {
    (elapsed_secs > 0).then(|| format!("{}:{:02}", elapsed_secs / 60, elapsed_secs % 60))
}

/// Elaborated status line. A hopeful verdict wins over the per-state table.
pub fn extended_message(snapshot: &LoadingSnapshot, hope: Option<&HopeVerdict>) -> Option<String> {
    if let Some(hope) = hope.filter(|h| h.hopeful) {
        return Some(format!("{}, please wait...", hope.reason));
    }
    let streaming = snapshot.proxy.segment_request_count > 0;
    let text = match snapshot.state {
        DisplayState::Connecting | DisplayState::ProxyConnecting => {
            "Establishing connection to the proxy server..."
        }
        DisplayState::ProxyResponding if streaming => "Proxy connected, receiving video data...",
        DisplayState::ProxyResponding => "Proxy server responded, fetching the video stream...",
        DisplayState::Loading if streaming => "Loading video segments, player getting ready...",
        DisplayState::Loading => "Loading video data, please wait...",
        DisplayState::Buffering => "Buffering video content, please be patient...",
        _ => return None,
    };
    Some(text.to_string())
}

/// Banner text once the timeout warning or smart suggestion is showing.
pub fn warning(snapshot: &LoadingSnapshot, smart: Option<&FailureVerdict>) -> Warning {
    if let Some(verdict) = smart.filter(|v| v.failed) {
        return Warning {
            severity: WarningSeverity::Critical,
            text: verdict.reason_text(),
        };
    }
    let proxy = &snapshot.proxy;
    let text = match snapshot.state {
        DisplayState::NoResponse => "Proxy server not responding, the source may be unreachable",
        DisplayState::Timeout => "Loading is taking too long, the source may have problems",
        _ if !proxy.is_responding => {
            "Proxy connection timed out, check your network or switch source"
        }
        _ if proxy.segment_request_count == 0 => {
            "Proxy connected but no video data arrived, consider switching source"
        }
        _ => "Loading is taking a while, you can switch source or try again later",
    };
    Warning {
        severity: WarningSeverity::Caution,
        text: text.to_string(),
    }
}
