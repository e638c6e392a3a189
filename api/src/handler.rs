use axum::{
    body::Bytes,
    extract::{OriginalUri, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{
    models::{Group, PriceSnapshot},
    Error as CommonError,
};
use serde::Serialize;
use std::sync::Arc;
use store::GroupStore;
use tracing::{debug, error};

use crate::config::{caller_identity, ScopeMode};
use crate::service::{PriceCache, ProxyCache};

/// Everything a request handler needs; holds no per-request mutable state
pub struct AppState {
    pub groups: GroupStore,
    pub prices: PriceCache,
    pub proxy: ProxyCache,
    pub scope_mode: ScopeMode,
    pub identity_header: HeaderName,
}

impl AppState {
    fn scope(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        Ok(self.scope_mode.resolve(headers, &self.identity_header)?)
    }
}

pub type SharedState = Arc<AppState>;

pub struct ApiError(CommonError);

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            CommonError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            CommonError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            CommonError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            CommonError::UpstreamError(msg) => (StatusCode::BAD_GATEWAY, msg),
            CommonError::HttpError(e) => (
                StatusCode::BAD_GATEWAY,
                format!("External API request failed: {}", e),
            ),
            CommonError::StoreError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            CommonError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            CommonError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            error!("Request failed with {}: {}", status, message);
        }

        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// Echo the identity asserted by the access proxy
pub async fn whoami(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<String, ApiError> {
    let identity = caller_identity(&headers, &state.identity_header).ok_or_else(|| {
        CommonError::Unauthorized("Missing access authentication.".to_string())
    })?;
    Ok(format!("User Email: {}", identity))
}

pub async fn list_groups(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Group>>, ApiError> {
    let scope = state.scope(&headers)?;
    Ok(Json(state.groups.get_groups(&scope).await))
}

// Full replace of the caller's groups
pub async fn replace_groups(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let scope = state.scope(&headers)?;

    let groups: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejecting group body: {}", e);
        CommonError::ValidationError("Invalid JSON".to_string())
    })?;

    state.groups.put_groups(&scope, &groups).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_prices(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<PriceSnapshot>, ApiError> {
    let scope = state.scope(&headers)?;
    let snapshot = state.prices.get_prices(&scope).await?;
    Ok(Json(snapshot))
}

// Relay /api/v3/* to CoinGecko, answering repeats from the proxy cache
pub async fn proxy_coingecko(
    State(state): State<SharedState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let proxied = state.proxy.fetch(path_and_query, &headers).await?;

    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, proxied.body).into_response();
    if let Some(content_type) = proxied
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

pub async fn not_found() -> ApiError {
    CommonError::NotFound("Not Found.".to_string()).into()
}
