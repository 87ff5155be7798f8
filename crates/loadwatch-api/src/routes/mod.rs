use axum::Router;

use crate::state::AppState;

pub mod proxy;
pub mod sessions;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(sessions::router())
        .merge(proxy::router())
}
