mod http;

pub use http::HttpLoader;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error {status} fetching {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
        is_last_retry: bool,
    },
    #[error("Network error fetching {url}: {reason}")]
    Network {
        url: String,
        reason: String,
        is_last_retry: bool,
    },
    #[error("Timeout fetching {url}")]
    Timeout { url: String, is_last_retry: bool },
}

impl LoadError {
    pub fn is_last_retry(&self) -> bool {
        match self {
            Self::Http { is_last_retry, .. }
            | Self::Network { is_last_retry, .. }
            | Self::Timeout { is_last_retry, .. } => *is_last_retry,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Fetches playlist and segment bodies, normally through the CORS proxy.
///
/// Object-safe and `Send + Sync` so one loader can serve many load drivers.
#[async_trait]
pub trait StreamLoader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}
