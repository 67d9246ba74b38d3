//! WebDAV route below the configured context.

use crate::handlers::put_document;
use crate::state::AppState;
use axum::{routing::put, Router};

pub fn webdav_routes(state: AppState) -> Router {
    let context = state.webdav_context.trim_end_matches('/').to_string();
    Router::new()
        .route(&format!("{}/*path", context), put(put_document))
        .with_state(state)
}
