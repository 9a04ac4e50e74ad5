// HTTP request handlers
use crate::application::refresh_scheduler::{RefreshOutcome, SeriesStatus};
use crate::application::trend_service::{
    OpenSeriesRequest, SeriesSnapshot, SeriesSummary, ServiceError,
};
use crate::domain::error::TrendError;
use crate::domain::series::SeriesConfig;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Longest a status request waits for a newer fetch.
const STATUS_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Wait until more than this many fetches have completed.
    pub after: Option<u64>,
}

/// Service errors rendered as JSON with a matching status code.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::NotOpen(_) => StatusCode::NOT_FOUND,
            ServiceError::Trend(TrendError::Configuration(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Trend(TrendError::TransientFetch(_) | TrendError::DataShape(_)) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Trend(TrendError::Persistence(_)) | ServiceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List open series with their status
pub async fn list_series(State(state): State<Arc<AppState>>) -> Json<Vec<SeriesSummary>> {
    Json(state.trend_service.list().await)
}

/// Open a view on a series, starting its refresh loop
pub async fn open_series(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenSeriesRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = state.trend_service.open(request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "seriesKey": key }))))
}

/// Windowed samples, config and status for display
pub async fn get_series(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SeriesSnapshot>, ApiError> {
    Ok(Json(state.trend_service.snapshot(&key, Utc::now()).await?))
}

/// Current status, optionally long-polling for the next completed fetch
pub async fn series_status(
    Path(key): Path<String>,
    Query(query): Query<StatusQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SeriesStatus>, ApiError> {
    let mut status = state.trend_service.subscribe(&key).await?;
    if let Some(after) = query.after {
        let changed = status.wait_for(|s| s.fetch_count > after || s.stopped);
        if tokio::time::timeout(STATUS_WAIT, changed).await.is_err() {
            tracing::debug!("Status wait for {} timed out", key);
        }
    }
    let current = status.borrow().clone();
    Ok(Json(current))
}

/// Manual refresh; failures are surfaced to the caller
pub async fn refresh_series(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    Ok(Json(state.trend_service.refresh(&key).await?))
}

/// Patch a series' config
pub async fn update_config(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> Result<Json<SeriesConfig>, ApiError> {
    Ok(Json(state.trend_service.reconfigure(&key, &patch).await?))
}

/// Close a view after flushing its cache
pub async fn close_series(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.trend_service.close(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete a series and its stored data
pub async fn delete_series(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.trend_service.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::StoreError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ServiceError::NotOpen("a".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::Trend(TrendError::Configuration("query not found".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Trend(TrendError::TransientFetch("timeout".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServiceError::Trend(TrendError::DataShape("not an array".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ServiceError::Store(StoreError::Backend("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }
}
