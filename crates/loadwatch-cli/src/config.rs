//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [proxy]
//! base_url = "https://tvcors.example.com"
//! health_timeout_ms = 3000
//!
//! [tracker]
//! no_response_timeout_ms = 8000
//! max_errors = 3
//!
//! [overlay]
//! smart_suggestion_after_ms = 10000
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use loadwatch_core::{OverlayConfig, ProxyConfig, TrackerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub proxy: ProxySection,

    #[serde(default)]
    pub tracker: TrackerSection,

    #[serde(default)]
    pub overlay: OverlaySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Proxy location. Without `base_url` the environment decides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySection {
    pub base_url: Option<String>,
    pub health_timeout_ms: Option<u64>,
    pub endpoint_timeout_ms: Option<u64>,
}

impl ProxySection {
    pub fn to_proxy_config(&self) -> Result<ProxyConfig, String> {
        let mut c = match self.base_url.as_deref() {
            Some(base) => ProxyConfig::new(base),
            None => ProxyConfig::from_env(),
        }
        .map_err(|e| e.to_string())?;
        if let Some(ms) = self.health_timeout_ms {
            c = c.with_health_timeout(ms);
        }
        if let Some(ms) = self.endpoint_timeout_ms {
            c = c.with_endpoint_timeout(ms);
        }
        Ok(c)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerSection {
    pub tick_interval_ms: Option<u64>,
    pub no_response_timeout_ms: Option<u64>,
    pub force_terminal_after_secs: Option<u64>,
    pub no_response_failure_secs: Option<u64>,
    pub no_stream_failure_secs: Option<u64>,
    pub max_errors: Option<u32>,
}

impl TrackerSection {
    pub fn to_tracker_config(&self) -> TrackerConfig {
        let mut c = TrackerConfig::default();
        if let Some(ms) = self.tick_interval_ms {
            c = c.with_tick_interval(ms);
        }
        if let Some(ms) = self.no_response_timeout_ms {
            c = c.with_no_response_timeout(ms);
        }
        if let Some(secs) = self.force_terminal_after_secs {
            c = c.with_force_terminal_after(secs);
        }
        if self.no_response_failure_secs.is_some() || self.no_stream_failure_secs.is_some() {
            let no_response = self.no_response_failure_secs.unwrap_or(c.no_response_failure_secs);
            let no_stream = self.no_stream_failure_secs.unwrap_or(c.no_stream_failure_secs);
            c = c.with_failure_thresholds(no_response, no_stream);
        }
        if let Some(max) = self.max_errors {
            c = c.with_max_errors(max);
        }
        c
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlaySection {
    pub extended_message_after_ms: Option<u64>,
    pub smart_suggestion_after_ms: Option<u64>,
    pub timeout_warning_after_ms: Option<u64>,
    pub timeout_warning_responding_after_ms: Option<u64>,
    pub timeout_warning_streaming_after_ms: Option<u64>,
}

impl OverlaySection {
    pub fn to_overlay_config(&self) -> OverlayConfig {
        let mut c = OverlayConfig::default();
        if let Some(ms) = self.extended_message_after_ms {
            c = c.with_extended_message_after(ms);
        }
        if let Some(ms) = self.smart_suggestion_after_ms {
            c = c.with_smart_suggestion_after(ms);
        }
        let warnings = [
            self.timeout_warning_after_ms,
            self.timeout_warning_responding_after_ms,
            self.timeout_warning_streaming_after_ms,
        ];
        if warnings.iter().any(Option::is_some) {
            let default_ms = warnings[0].unwrap_or(c.timeout_warning_after.as_millis() as u64);
            let responding_ms =
                warnings[1].unwrap_or(c.timeout_warning_responding_after.as_millis() as u64);
            let streaming_ms =
                warnings[2].unwrap_or(c.timeout_warning_streaming_after.as_millis() as u64);
            c = c.with_timeout_warnings(default_ms, responding_ms, streaming_ms);
        }
        c
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(base) = self.proxy.base_url.as_deref() {
            ProxyConfig::new(base).map_err(|e| format!("Invalid [proxy] base_url: {}", e))?;
        }

        for (name, value) in [
            ("health_timeout_ms", self.proxy.health_timeout_ms),
            ("endpoint_timeout_ms", self.proxy.endpoint_timeout_ms),
            ("tick_interval_ms", self.tracker.tick_interval_ms),
            ("no_response_timeout_ms", self.tracker.no_response_timeout_ms),
        ] {
            if value == Some(0) {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        if self.tracker.max_errors == Some(0) {
            return Err("max_errors must be greater than zero".into());
        }

        let overlay = self.overlay.to_overlay_config();
        if overlay.timeout_warning_responding_after < overlay.timeout_warning_after
            || overlay.timeout_warning_streaming_after < overlay.timeout_warning_responding_after
        {
            return Err(
                "Timeout warnings must not shrink as the proxy makes progress".into(),
            );
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }
}
