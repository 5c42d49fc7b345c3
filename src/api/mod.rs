//! Read-only REST API over the call store.
//!
//! Routes:
//! - `GET /health`
//! - `GET /api/v1/calls?limit=&offset=`
//! - `GET /api/v1/calls/{uuid}`

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::store::{CallRecord, CallStore};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn CallStore>,
}

/// Build the Axum router with all routes.
pub fn router(store: Arc<dyn CallStore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/calls", get(list_calls_handler))
        .route("/api/v1/calls/{uuid}", get(get_call_handler))
        .with_state(ApiState { store })
}

/// Serve `router` on `listener` until `token` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "API server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Raw query values; parsed leniently so bad input falls back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListParams {
    /// Limit in `1..=MAX_LIMIT`, otherwise the default.
    pub fn limit(&self) -> u32 {
        let Some(raw) = self.limit.as_deref() else {
            return DEFAULT_LIMIT;
        };
        match raw.parse::<u32>() {
            Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => limit,
            _ => {
                tracing::warn!(value = raw, default = DEFAULT_LIMIT, "Invalid limit, using default");
                DEFAULT_LIMIT
            }
        }
    }

    /// Non-negative offset, otherwise 0.
    pub fn offset(&self) -> u32 {
        let Some(raw) = self.offset.as_deref() else {
            return 0;
        };
        raw.parse::<u32>().unwrap_or_else(|_| {
            tracing::warn!(value = raw, "Invalid offset, using 0");
            0
        })
    }
}

/// GET /health
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}

/// GET /api/v1/calls
async fn list_calls_handler(State(state): State<ApiState>, Query(params): Query<ListParams>) -> Response {
    let (limit, offset) = (params.limit(), params.offset());
    match state.store.list_calls(limit, offset).await {
        Ok(calls) => Json::<Vec<CallRecord>>(calls).into_response(),
        Err(e) => {
            tracing::error!(error = %e, limit, offset, "Error retrieving calls from store");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve calls")
        }
    }
}

/// GET /api/v1/calls/{uuid}
async fn get_call_handler(State(state): State<ApiState>, Path(uuid): Path<String>) -> Response {
    match state.store.get_call(&uuid).await {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Call not found"),
        Err(e) => {
            tracing::error!(uuid = %uuid, error = %e, "Error retrieving call from store");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retrieve call")
        }
    }
}
