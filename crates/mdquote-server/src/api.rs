//! HTTP surface: `GET /quotes/:items` and `GET /health`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use mdquote_core::{ItemRecord, QuoteService};

use crate::error::ApiError;

/// State shared across handlers.
pub struct AppState {
    pub service: Arc<QuoteService>,
}

impl AppState {
    pub fn new(service: Arc<QuoteService>) -> Self {
        Self { service }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/quotes/:items", get(get_quotes))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteParams {
    /// Overrides the configured batch timeout for this request.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub session: String,
    pub in_flight: usize,
}

/// Split the path segment on commas. Blank segments are kept so the
/// correlator rejects them.
fn parse_items(items: &str) -> Vec<String> {
    items.split(',').map(|s| s.trim().to_string()).collect()
}

/// GET /quotes/:items
pub async fn get_quotes(
    State(state): State<Arc<AppState>>,
    Path(items): Path<String>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<Vec<ItemRecord>>, ApiError> {
    let timeout = match params.timeout_ms {
        Some(0) => return Err(ApiError::bad_request("timeout_ms must be positive")),
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };
    let keys = parse_items(&items);
    tracing::debug!(count = keys.len(), "quote request");

    let service = Arc::clone(&state.service);
    let report = tokio::task::spawn_blocking(move || service.request(keys, timeout))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))??;
    Ok(Json(report.records))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        session: state.service.session().health().to_string(),
        in_flight: state.service.registry().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_keep_blank_segments() {
        assert_eq!(parse_items("IBM.N, TRI.N"), ["IBM.N", "TRI.N"]);
        assert_eq!(parse_items("IBM.N,,TRI.N"), ["IBM.N", "", "TRI.N"]);
        assert_eq!(parse_items("IBM.N"), ["IBM.N"]);
    }
}
