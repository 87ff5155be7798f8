use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ProxyConfig, ProxyDebugInfo, ProxyKind, ProxyParams};

/// CORS headers every proxied response is expected to carry.
pub const CORS_HEADERS: [&str; 3] = [
    "access-control-allow-origin",
    "access-control-allow-methods",
    "access-control-allow-headers",
];

const SAMPLE_PLAYLIST_URL: &str = "https://httpbin.org/get";
const SAMPLE_LOGO_URL: &str = "https://httpbin.org/image/png";

#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("HTTP {status}")]
    Http { status: u16 },
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("network error: {reason}")]
    Network { reason: String },
}

/// Response metadata from the proxy root.
#[derive(Debug, Clone, Serialize)]
pub struct RootProbe {
    pub status: u16,
    pub content_type: Option<String>,
}

/// Outcome of probing one proxy endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub name: String,
    pub url: String,
    pub result: Result<u16, ProbeError>,
    /// Which of [`CORS_HEADERS`] were present. Empty when the request failed.
    pub cors_headers: Vec<String>,
}

impl EndpointReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn has_cors(&self) -> bool {
        !self.cors_headers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub debug: ProxyDebugInfo,
    pub sample_urls: Vec<(String, String)>,
    pub root: Result<RootProbe, ProbeError>,
    pub endpoints: Vec<EndpointReport>,
}

impl SmokeReport {
    pub fn root_ok(&self) -> bool {
        matches!(&self.root, Ok(root) if (200..300).contains(&root.status))
    }

    pub fn passed(&self) -> bool {
        self.root_ok() && self.endpoints.iter().all(EndpointReport::is_ok)
    }
}

/// Reachability checks against the configured proxy.
#[derive(Debug, Clone)]
pub struct ProxyProbe {
    config: ProxyConfig,
    client: Client,
}

impl ProxyProbe {
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_client(config, build_client())
    }

    pub fn with_client(config: ProxyConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// `GET {base}/` within the health timeout. Any failure reads as unhealthy.
    pub async fn check_health(&self) -> bool {
        match self.probe_root(self.config.health_timeout).await {
            Ok(root) => {
                let healthy = (200..300).contains(&root.status);
                debug!(status = root.status, healthy, "Proxy health check");
                healthy
            }
            Err(e) => {
                warn!(base = self.config.base_str(), error = %e, "Proxy health check failed");
                false
            }
        }
    }

    /// `GET {base}/`, reporting status and content type for any HTTP response.
    pub async fn probe_root(&self, timeout: Duration) -> Result<RootProbe, ProbeError> {
        let response = self
            .client
            .get(self.config.root_url())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;
        Ok(RootProbe {
            status: response.status().as_u16(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }

    /// Probes the playlist and logo endpoints with known-good upstream resources.
    pub async fn probe_endpoints(&self) -> Vec<EndpointReport> {
        let targets = [
            (ProxyKind::M3u8, SAMPLE_PLAYLIST_URL),
            (ProxyKind::Logo, SAMPLE_LOGO_URL),
        ];
        let probes = targets.into_iter().map(|(kind, resource)| {
            let url = self.config.build_url(kind, &ProxyParams::new(resource));
            self.probe_endpoint(kind.as_str().to_string(), url)
        });
        futures::future::join_all(probes).await
    }

    async fn probe_endpoint(&self, name: String, url: url::Url) -> EndpointReport {
        let timeout = self.config.endpoint_timeout;
        let outcome = self.client.get(url.clone()).timeout(timeout).send().await;
        let (result, cors_headers) = match outcome {
            Ok(response) => {
                let status = response.status();
                let cors = present_cors_headers(response.headers());
                if status.is_success() {
                    (Ok(status.as_u16()), cors)
                } else {
                    (Err(ProbeError::Http { status: status.as_u16() }), cors)
                }
            }
            Err(e) => (Err(request_error(e, timeout)), Vec::new()),
        };
        match &result {
            Ok(status) => info!(endpoint = %name, status, cors = cors_headers.len(), "Endpoint reachable"),
            Err(e) => warn!(endpoint = %name, error = %e, "Endpoint probe failed"),
        }
        EndpointReport {
            name,
            url: url.to_string(),
            result,
            cors_headers,
        }
    }

    /// Example proxy URLs: playlist, logo, and playlist with CORS forced on.
    pub fn sample_urls(&self) -> Vec<(String, String)> {
        let stream = "https://example.com/stream.m3u8";
        let source = Some("test-source");
        vec![
            (
                "m3u8".to_string(),
                self.config.build_m3u8_proxy_url(stream, source, None).to_string(),
            ),
            (
                "logo".to_string(),
                self.config
                    .build_logo_proxy_url("https://example.com/logo.png", source)
                    .to_string(),
            ),
            (
                "m3u8 (allowCORS)".to_string(),
                self.config
                    .build_m3u8_proxy_url(stream, source, Some(true))
                    .to_string(),
            ),
        ]
    }

    /// Debug info, sample URLs, root probe and endpoint probes in one pass.
    pub async fn smoke_test(&self, debug: ProxyDebugInfo) -> SmokeReport {
        let mut report = SmokeReport {
            debug,
            sample_urls: self.sample_urls(),
            root: self.probe_root(self.config.smoke_root_timeout).await,
            endpoints: Vec::new(),
        };
        if report.root_ok() {
            report.endpoints = self.probe_endpoints().await;
        }
        report
    }
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

fn request_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ProbeError::Network {
            reason: e.to_string(),
        }
    }
}

fn present_cors_headers(headers: &HeaderMap) -> Vec<String> {
    CORS_HEADERS
        .iter()
        .filter(|name| headers.contains_key(**name))
        .map(|name| name.to_string())
        .collect()
}
