//! Request dispatcher for the versioned resource APIs.
//! Locate → extract params → execute in a retrying transaction → render. Every failure becomes
//! a structured error response.

use crate::error::ApiError;
use crate::extractors::RunAsUser;
use crate::renderer::render;
use crate::resource::params::{VAR_API_NAME, VAR_API_SCOPE, VAR_API_VERSION};
use crate::resource::{Api, HttpMethod, Params, RequestData};
use crate::service::{effective_user, execute};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

pub async fn handle_request(
    State(state): State<AppState>,
    method: Method,
    RunAsUser(user): RunAsUser,
    path: Result<Path<HashMap<String, String>>, PathRejection>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (vars, query) = match (path, query) {
        (Ok(Path(vars)), Ok(Query(query))) => (vars, query),
        (Err(e), _) => return ApiError::InvalidArgument(e.body_text()).into_response(),
        (_, Err(e)) => return ApiError::InvalidArgument(e.body_text()).into_response(),
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let request = RequestData {
        vars,
        query,
        content_type,
        body,
        user,
    };
    match dispatch(&state, &method, &request, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn dispatch(state: &AppState, method: &Method, request: &RequestData, headers: &HeaderMap) -> Result<Response, ApiError> {
    let api = Api::parse(
        request.var(VAR_API_SCOPE).unwrap_or_default(),
        request.var(VAR_API_NAME).unwrap_or_default(),
        request.var(VAR_API_VERSION).unwrap_or_default(),
    )?;
    let method = HttpMethod::try_from(method)?;
    let resource = state.locator.locate(&api, &request.vars, method)?;
    let params = Params::extract(method, resource.kind(), request)?;
    let (status, outcome) = execute(&state.transactions, &state.capabilities, &resource, method, &params).await?;
    let user = effective_user(&resource, method, &params);
    render(status, outcome, &state.streamer, headers, user).await
}
