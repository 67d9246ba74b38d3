//! Resource API routes. Every depth of the URL template goes to the same dispatcher, which
//! reads the matched segments from the path parameters.

use crate::handlers::handle_request;
use crate::state::AppState;
use axum::{routing::any, Router};

pub const API_ROOT: &str = "/api/:apiScope/:apiName/versions/:apiVersion";

pub fn api_routes(state: AppState) -> Router {
    let collection = format!("{}/:collectionResource", API_ROOT);
    let entity = format!("{}/:entityId", collection);
    let relationship = format!("{}/:relationshipResource", entity);
    let relationship_id = format!("{}/:relationshipId", relationship);
    let property = format!("{}/:property", relationship_id);
    Router::new()
        .route(&collection, any(handle_request))
        .route(&entity, any(handle_request))
        .route(&relationship, any(handle_request))
        .route(&relationship_id, any(handle_request))
        .route(&property, any(handle_request))
        .with_state(state)
}
