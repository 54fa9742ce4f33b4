//! Webhook HTTP ingress.
//!
//! Thin axum layer over the [`WebhookRouter`]: it maps transport details
//! (paths, headers, status codes) and never lets an error escape as a
//! panic; every failure becomes a structured response.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::router::{WebhookError, WebhookRouter};

/// Build the webhook router with its routes and tracing layer.
pub fn webhook_app(router: Arc<WebhookRouter>) -> Router {
    Router::new()
        .route("/webhook/{provider}", post(handle_webhook))
        // Legacy path; the repo id segment is ignored and the repo is
        // resolved from the payload.
        .route("/webhook/{provider}/{repo_id}", post(handle_webhook_legacy))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "webhook"}))
}

async fn handle_webhook(
    State(router): State<Arc<WebhookRouter>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch(&router, &provider, &headers, body).await
}

async fn handle_webhook_legacy(
    State(router): State<Arc<WebhookRouter>>,
    Path((provider, _repo_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    dispatch(&router, &provider, &headers, body).await
}

async fn dispatch(
    router: &WebhookRouter,
    provider: &str,
    headers: &HeaderMap,
    body: serde_json::Value,
) -> Response {
    let event_header = header_value(headers, &format!("x-{provider}-event"));
    let token_header = header_value(headers, &format!("x-{provider}-token"));

    match router
        .handle(provider, event_header.as_deref(), token_header.as_deref(), body.clone())
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(WebhookError::UnknownRepo(project)) => {
            tracing::warn!(project = %project, "Webhook for unknown repo");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"status": "error", "message": "unknown repo"})),
            )
                .into_response()
        }
        Err(WebhookError::Unauthorized(reason)) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "message": reason})),
        )
            .into_response(),
        Err(WebhookError::Internal(e)) => {
            tracing::error!(payload_hash = payload_hash(&body), "Webhook processing failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "message": "internal error"})),
            )
                .into_response()
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Hash of the payload for log correlation without logging the payload.
fn payload_hash(body: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Serve the webhook endpoint until the process is stopped.
pub async fn serve(router: Arc<WebhookRouter>, host: &str, port: u16) -> std::io::Result<()> {
    let app = webhook_app(router);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Webhook server listening");
    axum::serve(listener, app).await
}
