use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Idle,
    Connecting,
    ProxyConnecting,
    ProxyResponding,
    Loading,
    Buffering,
    Playing,
    Success,
    Error,
    Timeout,
    NoResponse,
}

impl DisplayState {
    pub const ALL: [DisplayState; 11] = [
        DisplayState::Idle,
        DisplayState::Connecting,
        DisplayState::ProxyConnecting,
        DisplayState::ProxyResponding,
        DisplayState::Loading,
        DisplayState::Buffering,
        DisplayState::Playing,
        DisplayState::Success,
        DisplayState::Error,
        DisplayState::Timeout,
        DisplayState::NoResponse,
    ];

    /// States in which the elapsed-time clock is stopped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Error | Self::Success | Self::Timeout | Self::NoResponse
        )
    }

    /// States that arm the no-response watchdog.
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::ProxyConnecting)
    }

    /// States during which the overlay runs its reveal timers and shows progress.
    pub fn is_loading_phase(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::ProxyConnecting
                | Self::ProxyResponding
                | Self::Loading
                | Self::Buffering
        )
    }

    /// Terminal states that offer retry / switch-source actions.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout | Self::NoResponse)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::ProxyConnecting => "proxy_connecting",
            Self::ProxyResponding => "proxy_responding",
            Self::Loading => "loading",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::NoResponse => "no_response",
        }
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized || state.as_str().replace('_', "") == normalized)
            .ok_or_else(|| format!("Unknown display state '{}'", s))
    }
}

/// Proxy telemetry reported by the player for one loading session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub is_responding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_time: Option<DateTime<Utc>>,
    pub segment_request_count: u32,
    pub error_count: u32,
}

/// Point-in-time view of a tracker, published after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingSnapshot {
    pub state: DisplayState,
    pub message: String,
    pub elapsed_secs: u64,
    pub clock_running: bool,
    pub proxy: ProxyStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = DisplayState::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                DisplayState::Idle,
                DisplayState::Success,
                DisplayState::Error,
                DisplayState::Timeout,
                DisplayState::NoResponse,
            ]
        );
    }

    #[test]
    fn playing_runs_the_clock_but_is_not_a_loading_phase() {
        assert!(!DisplayState::Playing.is_terminal());
        assert!(!DisplayState::Playing.is_loading_phase());
    }

    #[test]
    fn parse_accepts_snake_and_camel_case() {
        assert_eq!("proxy_connecting".parse::<DisplayState>(), Ok(DisplayState::ProxyConnecting));
        assert_eq!("proxyConnecting".parse::<DisplayState>(), Ok(DisplayState::ProxyConnecting));
        assert_eq!("no-response".parse::<DisplayState>(), Ok(DisplayState::NoResponse));
        assert!("paused".parse::<DisplayState>().is_err());
    }

    #[test]
    fn display_matches_serde_name() {
        let json = serde_json::to_string(&DisplayState::ProxyResponding).unwrap();
        assert_eq!(json, format!("\"{}\"", DisplayState::ProxyResponding));
    }
}
