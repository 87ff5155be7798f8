//! Loading overlay: what a player frontend should show while a stream loads.

mod driver;
mod model;
pub mod view;

pub use driver::OverlayHandle;
pub use model::{LoadingOverlay, OverlayActions};
pub use view::{
    ActionKind, OverlayAction, OverlayIcon, OverlayView, Progress, ProgressTone, StatusLine,
    StreamIndicator, Warning, WarningSeverity,
};
