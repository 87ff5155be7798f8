#![forbid(unsafe_code)]

pub mod config;
pub mod loader;
pub mod overlay;
pub mod playback;
pub mod proxy;
pub mod tracker;

pub use config::{OverlayConfig, TrackerConfig};
pub use loader::{HttpLoader, LoadError, StreamLoader};
pub use overlay::{ActionKind, LoadingOverlay, OverlayActions, OverlayHandle, OverlayView};
pub use playback::{DriveError, DriverConfig, LoadDriver, LoadReport};
pub use proxy::{
    EndpointReport, ProbeError, ProxyConfig, ProxyDebugInfo, ProxyError, ProxyKind, ProxyParams,
    ProxyProbe, SmokeReport, XtreamCredentials,
};
pub use tracker::{
    Classifier, DisplayState, FailureReason, FailureVerdict, HeuristicClassifier, HopeReason,
    HopeVerdict, LoadingSession, LoadingSnapshot, LoadingTracker, ProxyStatus,
};
