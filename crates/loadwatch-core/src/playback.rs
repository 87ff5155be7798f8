//! Drives a real stream load through the CORS proxy and reports each step
//! to a [`LoadingTracker`], the way a media player would.

use std::sync::Arc;

use m3u8_rs::{MediaPlaylist, Playlist};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::loader::{LoadError, StreamLoader};
use crate::proxy::ProxyConfig;
use crate::tracker::classify::{MSG_CONNECTING_PROXY, MSG_READY};
use crate::tracker::{DisplayState, LoadingTracker};

const MSG_LOADING: &str = "Loading video data...";
const MSG_BUFFERING: &str = "Buffering video content...";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Invalid stream URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to load playlist: {0}")]
    Playlist(#[source] LoadError),
    #[error("Failed to parse playlist {url}: {message}")]
    Parse { url: String, message: String },
    #[error("Playlist {url} has no segments")]
    EmptyPlaylist { url: String },
    #[error("No segment could be loaded ({errors} errors)")]
    NoSegments { errors: usize },
    #[error("Load abandoned in state {0}")]
    Abandoned(DisplayState),
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Segments to fetch before the stream counts as ready (default: 3).
    pub segment_target: usize,
    pub source: Option<String>,
    pub allow_cors: Option<bool>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            segment_target: 3,
            source: None,
            allow_cors: None,
        }
    }
}

impl DriverConfig {
    pub fn with_segment_target(mut self, n: usize) -> Self {
        self.segment_target = n.max(1);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_allow_cors(mut self, allow: bool) -> Self {
        self.allow_cors = Some(allow);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub playlist_url: String,
    /// Upstream URL of the media playlist when the input was a master playlist.
    pub variant_url: Option<String>,
    pub segments_loaded: usize,
    pub segment_errors: usize,
    pub key_fetched: bool,
    pub bytes: u64,
    pub final_state: DisplayState,
}

pub struct LoadDriver {
    proxy: ProxyConfig,
    loader: Arc<dyn StreamLoader>,
    config: DriverConfig,
}

impl LoadDriver {
    pub fn new(proxy: ProxyConfig, loader: Arc<dyn StreamLoader>, config: DriverConfig) -> Self {
        Self {
            proxy,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Loads `stream_url` through the proxy, reporting progress to `tracker`.
    ///
    /// Ends in `success` once the segment target is met or the playlist is
    /// exhausted with at least one segment loaded, and in `error` otherwise.
    /// If the tracker's own timers end the session first the load is abandoned.
    pub async fn run(&self, tracker: &LoadingTracker, stream_url: &str) -> Result<LoadReport, DriveError> {
        let result = self.drive(tracker, stream_url).await;
        if let Err(e) = &result {
            let state = tracker.snapshot().await.state;
            if !state.is_failure() {
                tracker.update_state(DisplayState::Error, e.to_string()).await;
            }
            warn!(tracker_id = %tracker.id(), stream_url, error = %e, "Stream load failed");
        }
        result
    }

    async fn drive(&self, tracker: &LoadingTracker, stream_url: &str) -> Result<LoadReport, DriveError> {
        let upstream = Url::parse(stream_url).map_err(|e| DriveError::InvalidUrl {
            url: stream_url.to_string(),
            reason: e.to_string(),
        })?;
        let source = self.config.source.as_deref();

        tracker
            .smart_update_state(DisplayState::Connecting, MSG_CONNECTING_PROXY)
            .await;

        let playlist_url = self
            .proxy
            .build_m3u8_proxy_url(upstream.as_str(), source, self.config.allow_cors);
        let body = self.fetch_playlist(tracker, playlist_url.as_str()).await?;
        tracker.record_proxy_response().await;
        ensure_live(tracker).await?;

        let (media_url, media, variant_url) = match parse(&playlist_url, &body)? {
            Playlist::MediaPlaylist(media) => (upstream, media, None),
            Playlist::MasterPlaylist(master) => {
                let variant = master
                    .variants
                    .iter()
                    .find(|v| !v.is_i_frame)
                    .ok_or_else(|| DriveError::EmptyPlaylist {
                        url: upstream.to_string(),
                    })?;
                let variant_url = join(&upstream, &variant.uri)?;
                debug!(variant = %variant_url, bandwidth = variant.bandwidth, "Resolved master playlist");
                let proxied = self
                    .proxy
                    .build_m3u8_proxy_url(variant_url.as_str(), source, self.config.allow_cors);
                let body = self.fetch_playlist(tracker, proxied.as_str()).await?;
                ensure_live(tracker).await?;
                match parse(&proxied, &body)? {
                    Playlist::MediaPlaylist(media) => {
                        let shown = variant_url.to_string();
                        (variant_url, media, Some(shown))
                    }
                    Playlist::MasterPlaylist(_) => {
                        return Err(DriveError::Parse {
                            url: proxied.to_string(),
                            message: "variant is itself a master playlist".to_string(),
                        })
                    }
                }
            }
        };

        if media.segments.is_empty() {
            return Err(DriveError::EmptyPlaylist {
                url: media_url.to_string(),
            });
        }

        tracker.smart_update_state(DisplayState::Loading, MSG_LOADING).await;

        let key_fetched = self.fetch_key(tracker, &media_url, &media).await;

        let mut report = LoadReport {
            playlist_url: playlist_url.to_string(),
            variant_url,
            segments_loaded: 0,
            segment_errors: 0,
            key_fetched,
            bytes: 0,
            final_state: DisplayState::Loading,
        };

        for segment in media.segments.iter().take(self.config.segment_target) {
            let segment_url = join(&media_url, &segment.uri)?;
            let proxied = self.proxy.build_segment_proxy_url(segment_url.as_str(), source);
            match self.loader.fetch(proxied.as_str()).await {
                Ok(bytes) => {
                    report.segments_loaded += 1;
                    report.bytes += bytes.len() as u64;
                    tracker.record_segment_request().await;
                    debug!(segment = %segment_url, size = bytes.len(), "Segment loaded");
                    if report.segments_loaded == 1 {
                        tracker.smart_update_state(DisplayState::Loading, MSG_LOADING).await;
                    } else if report.segments_loaded == 2 {
                        tracker.update_state(DisplayState::Buffering, MSG_BUFFERING).await;
                    }
                }
                Err(e) => {
                    report.segment_errors += 1;
                    tracker.record_error().await;
                    warn!(segment = %segment_url, error = %e, "Segment fetch failed");
                }
            }
            ensure_live(tracker).await?;
        }

        if report.segments_loaded == 0 {
            return Err(DriveError::NoSegments {
                errors: report.segment_errors,
            });
        }

        tracker.update_state(DisplayState::Success, MSG_READY).await;
        report.final_state = DisplayState::Success;
        info!(
            tracker_id = %tracker.id(),
            segments = report.segments_loaded,
            errors = report.segment_errors,
            bytes = report.bytes,
            "Stream ready"
        );
        Ok(report)
    }

    async fn fetch_playlist(&self, tracker: &LoadingTracker, url: &str) -> Result<Vec<u8>, DriveError> {
        match self.loader.fetch(url).await {
            Ok(body) => Ok(body),
            Err(e) => {
                tracker.record_error().await;
                ensure_live(tracker).await?;
                Err(DriveError::Playlist(e))
            }
        }
    }

    /// Fetches the first segment's decryption key, if any, through the key proxy.
    async fn fetch_key(&self, tracker: &LoadingTracker, media_url: &Url, media: &MediaPlaylist) -> bool {
        let Some(key_uri) = media
            .segments
            .iter()
            .find_map(|s| s.key.as_ref().and_then(|k| k.uri.clone()))
        else {
            return false;
        };
        let Ok(key_url) = media_url.join(&key_uri) else {
            warn!(key_uri = %key_uri, "Unresolvable key URI");
            return false;
        };
        let proxied = self
            .proxy
            .build_key_proxy_url(key_url.as_str(), self.config.source.as_deref());
        match self.loader.fetch(proxied.as_str()).await {
            Ok(_) => true,
            Err(e) => {
                tracker.record_error().await;
                warn!(key = %key_url, error = %e, "Key fetch failed");
                false
            }
        }
    }
}

async fn ensure_live(tracker: &LoadingTracker) -> Result<(), DriveError> {
    let state = tracker.snapshot().await.state;
    if state.is_failure() {
        return Err(DriveError::Abandoned(state));
    }
    Ok(())
}

fn parse(url: &Url, body: &[u8]) -> Result<Playlist, DriveError> {
    match m3u8_rs::parse_playlist(body) {
        Ok((_, playlist)) => Ok(playlist),
        Err(e) => Err(DriveError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}

fn join(base: &Url, reference: &str) -> Result<Url, DriveError> {
    base.join(reference).map_err(|e| DriveError::InvalidUrl {
        url: reference.to_string(),
        reason: e.to_string(),
    })
}
