//! CORS-proxy endpoint configuration, URL building and reachability probes.
//!
//! The proxy itself is an external service. This module only knows how to
//! address it: `GET {base}/api/proxy/{kind}?url=...&extras`.

mod health;
mod url_builder;

pub use health::{EndpointReport, ProbeError, ProxyProbe, RootProbe, SmokeReport};
pub use url_builder::{ProxyParams, XtreamCredentials};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Variable read first when resolving the proxy base URL.
pub const PUBLIC_PROXY_URL_ENV: &str = "NEXT_PUBLIC_TVCORS_PROXY_URL";
/// Variable read when [`PUBLIC_PROXY_URL_ENV`] is unset or empty.
pub const SERVER_PROXY_URL_ENV: &str = "TVCORS_PROXY_URL";
pub const DEFAULT_PROXY_BASE_URL: &str = "http://localhost:3001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    M3u8,
    M3u,
    Segment,
    Key,
    Logo,
    Xtream,
    Stalker,
}

impl ProxyKind {
    pub const ALL: [ProxyKind; 7] = [
        ProxyKind::M3u8,
        ProxyKind::M3u,
        ProxyKind::Segment,
        ProxyKind::Key,
        ProxyKind::Logo,
        ProxyKind::Xtream,
        ProxyKind::Stalker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M3u8 => "m3u8",
            Self::M3u => "m3u",
            Self::Segment => "segment",
            Self::Key => "key",
            Self::Logo => "logo",
            Self::Xtream => "xtream",
            Self::Stalker => "stalker",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| ProxyError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid proxy base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Proxy base URL must use http or https: {url}")]
    UnsupportedScheme { url: String },
    #[error("Unknown proxy kind '{0}'")]
    UnknownKind(String),
}

/// Where the proxy lives and how long probes may wait for it.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    base_url: Url,
    /// Timeout for the root health check (default: 5s).
    pub health_timeout: Duration,
    /// Timeout for each endpoint smoke probe (default: 8s).
    pub endpoint_timeout: Duration,
    /// Timeout for the root probe of the smoke test (default: 10s).
    pub smoke_root_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::with_base(parse_default_base())
    }
}

fn parse_default_base() -> Url {
    match Url::parse(DEFAULT_PROXY_BASE_URL) {
        Ok(url) => url,
        Err(e) => unreachable!("default proxy base URL is valid: {e}"),
    }
}

impl ProxyConfig {
    /// Validates `base` as an http(s) URL. One trailing slash is stripped
    /// before parsing; query and fragment are dropped.
    pub fn new(base: &str) -> Result<Self, ProxyError> {
        let trimmed = base.trim();
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let mut url = Url::parse(trimmed).map_err(|e| ProxyError::InvalidBaseUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ProxyError::UnsupportedScheme { url: base.to_string() });
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(Self::with_base(url))
    }

    fn with_base(base_url: Url) -> Self {
        Self {
            base_url,
            health_timeout: Duration::from_secs(5),
            endpoint_timeout: Duration::from_secs(8),
            smoke_root_timeout: Duration::from_secs(10),
        }
    }

    /// Resolves the base URL from the process environment.
    pub fn from_env() -> Result<Self, ProxyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the base URL through `lookup`, so callers can supply their own environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProxyError> {
        let public = lookup(PUBLIC_PROXY_URL_ENV);
        let server = lookup(SERVER_PROXY_URL_ENV);
        if let (Some(p), Some(s)) = (non_empty(&public), non_empty(&server)) {
            if p != s {
                warn!(
                    public = p,
                    server = s,
                    "Both proxy URL variables are set and differ, using {}",
                    PUBLIC_PROXY_URL_ENV
                );
            }
        }
        Self::new(resolve_base_url(public.as_deref(), server.as_deref()))
    }

    pub fn with_health_timeout(mut self, ms: u64) -> Self {
        self.health_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_endpoint_timeout(mut self, ms: u64) -> Self {
        self.endpoint_timeout = Duration::from_millis(ms);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL rendered without a trailing slash.
    pub fn base_str(&self) -> &str {
        let s = self.base_url.as_str();
        s.strip_suffix('/').unwrap_or(s)
    }

    /// `{base}/`, the target of the health probe.
    pub fn root_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("");
        }
        url
    }
}

/// First non-empty of the public and server variables, else the local default.
pub fn resolve_base_url<'a>(public: Option<&'a str>, server: Option<&'a str>) -> &'a str {
    public
        .filter(|v| !v.is_empty())
        .or_else(|| server.filter(|v| !v.is_empty()))
        .unwrap_or(DEFAULT_PROXY_BASE_URL)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Proxy configuration as seen from the environment, for troubleshooting.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyDebugInfo {
    pub base_url: String,
    pub public_env: Option<String>,
    pub server_env: Option<String>,
}

impl ProxyDebugInfo {
    pub fn from_env(config: &ProxyConfig) -> Self {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(config: &ProxyConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            base_url: config.base_str().to_string(),
            public_env: lookup(PUBLIC_PROXY_URL_ENV),
            server_env: lookup(SERVER_PROXY_URL_ENV),
        }
    }
}
