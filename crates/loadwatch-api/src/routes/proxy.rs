use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use loadwatch_core::{ProxyKind, ProxyParams};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BuildUrlQuery {
    pub kind: String,
    pub url: String,
    pub source: Option<String>,
    #[serde(rename = "allowCORS")]
    pub allow_cors: Option<bool>,
}

#[derive(Serialize)]
pub struct BuildUrlResponse {
    pub kind: ProxyKind,
    pub url: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub base_url: String,
    pub healthy: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/proxy/url", get(build_url))
        .route("/proxy/health", get(proxy_health))
}

/// GET /api/v1/proxy/url
async fn build_url(
    State(state): State<AppState>,
    Query(query): Query<BuildUrlQuery>,
) -> Result<Json<BuildUrlResponse>, ApiError> {
    let kind: ProxyKind = query.kind.parse()?;
    if query.url.is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".into()));
    }

    let params = ProxyParams::new(query.url)
        .source(query.source.as_deref())
        .set_opt("allowCORS", query.allow_cors.filter(|_| kind == ProxyKind::M3u8));
    let url = state.proxy.build_url(kind, &params);

    Ok(Json(BuildUrlResponse {
        kind,
        url: url.into(),
    }))
}

/// GET /api/v1/proxy/health
async fn proxy_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        base_url: state.proxy.base_str().to_string(),
        healthy: state.probe.check_health().await,
    })
}
