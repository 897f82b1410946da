// HTTP request handlers
use crate::domain::error::WindowError;
use crate::domain::window::WindowRequest;
use crate::infrastructure::http_response::{error_response, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_PIXEL_WIDTH: f64 = 1000.0;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub pixel_width: Option<f64>,
}

impl WindowQuery {
    fn into_request(self, well_id: String, metric: String) -> Result<WindowRequest, WindowError> {
        let (Some(from), Some(to)) = (self.from, self.to) else {
            return Err(WindowError::invalid_range("`from` and `to` are required"));
        };
        Ok(WindowRequest::new(
            well_id,
            metric,
            from,
            to,
            self.pixel_width.unwrap_or(DEFAULT_PIXEL_WIDTH),
        ))
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Downsampled curve window
pub async fn fetch_window(
    Path((well_id, metric)): Path<(String, String)>,
    Query(query): Query<WindowQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);

    let result = match query.into_request(well_id, metric) {
        Ok(request) => state.window_service.fetch_window(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(window) => into_response(json_response(&window, compress).await),
        Err(e) => window_error_response(e).await,
    }
}

/// Level and cache coverage a window request would get, without building tiles
pub async fn plan_window(
    Path((well_id, metric)): Path<(String, String)>,
    Query(query): Query<WindowQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);

    let result = match query.into_request(well_id, metric) {
        Ok(request) => state.window_service.plan_window(&request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(plan) => into_response(json_response(&plan, compress).await),
        Err(e) => window_error_response(e).await,
    }
}

/// Drop cached metadata after a series was re-uploaded
pub async fn invalidate_series(
    Path((well_id, metric)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.window_service.invalidate_series(&well_id, &metric).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!("Invalidating {}/{} failed: {:#}", well_id, metric, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "cache unavailable").await
        }
    }
}

fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("br"))
        .unwrap_or(false)
}

fn into_response(result: Result<Response<Body>, StatusCode>) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn window_error_response(error: WindowError) -> Response<Body> {
    match &error {
        WindowError::InvalidRange { .. } => {
            error_response(StatusCode::BAD_REQUEST, &error.to_string()).await
        }
        WindowError::RowSource(_) => {
            tracing::error!("Window request failed: {}", error);
            error_response(StatusCode::BAD_GATEWAY, "row source unavailable").await
        }
    }
}
