pub mod classify;
pub mod engine;
pub mod session;
pub mod state;

pub use classify::{
    Classifier, FailureReason, FailureVerdict, HeuristicClassifier, HopeReason, HopeVerdict,
};
pub use engine::LoadingTracker;
pub use session::LoadingSession;
pub use state::{DisplayState, LoadingSnapshot, ProxyStatus};
