use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{LoadError, StreamLoader};

/// HTTP loader with connection pooling, retries, and exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpLoader {
    pub fn new(timeout: Duration, max_retries: u32, base_backoff: Duration) -> Self {
        Self::with_client(Self::build_client(timeout), max_retries, base_backoff)
    }

    pub fn with_client(client: Client, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            client,
            max_retries,
            base_backoff,
        }
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            })
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), 2, Duration::from_millis(200))
    }
}

#[async_trait]
impl StreamLoader for HttpLoader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let mut attempt = 0;
        loop {
            let is_last = attempt == self.max_retries;
            if attempt > 0 {
                let backoff = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying fetch");
                tokio::time::sleep(backoff).await;
            }

            let err = match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(e) => LoadError::Network {
                        url: url.to_string(),
                        reason: e.to_string(),
                        is_last_retry: is_last,
                    },
                },
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(url, status, attempt, "Fetch returned error status");
                    let err = LoadError::Http {
                        url: url.to_string(),
                        status,
                        message: response
                            .status()
                            .canonical_reason()
                            .unwrap_or("Unknown")
                            .to_string(),
                        is_last_retry: is_last,
                    };
                    // Client errors other than rate limiting will not improve on retry.
                    if (400..500).contains(&status) && status != 429 {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() => {
                    warn!(url, attempt, "Fetch timed out");
                    LoadError::Timeout {
                        url: url.to_string(),
                        is_last_retry: is_last,
                    }
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "Fetch network error");
                    LoadError::Network {
                        url: url.to_string(),
                        reason: e.to_string(),
                        is_last_retry: is_last,
                    }
                }
            };

            if is_last {
                return Err(err);
            }
            attempt += 1;
        }
    }
}
