//! Inbound HTTP server (axum): the webhook endpoint plus a health probe.
//!
//! Handlers only translate HTTP to and from the core webhook adapter; they never
//! wait on reconciliation.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use sw_core::{
    eventsub::{
        WebhookHeaders, WebhookReply, HEADER_MESSAGE_ID, HEADER_MESSAGE_TYPE, HEADER_SIGNATURE,
        HEADER_TIMESTAMP,
    },
    service::PresenceService,
};

pub fn build_router(service: Arc<PresenceService>, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(webhook_handler))
        .route("/healthz", get(health_handler))
        .with_state(service)
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn serve(bind: &str, router: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind webhook server on {bind}"))?;
    let addr = listener
        .local_addr()
        .context("failed to read webhook server address")?;
    tracing::info!(%addr, "webhook server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("webhook server error")?;
    tracing::info!("webhook server stopped");
    Ok(())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn extract_headers(headers: &HeaderMap) -> WebhookHeaders {
    WebhookHeaders {
        message_id: header_value(headers, HEADER_MESSAGE_ID),
        timestamp: header_value(headers, HEADER_TIMESTAMP),
        signature: header_value(headers, HEADER_SIGNATURE),
        message_type: header_value(headers, HEADER_MESSAGE_TYPE),
    }
}

async fn webhook_handler(
    State(service): State<Arc<PresenceService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match service.ingest_webhook_event(&extract_headers(&headers), &body) {
        WebhookReply::Challenge(challenge) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response(),
        WebhookReply::Accepted | WebhookReply::Revoked => StatusCode::NO_CONTENT.into_response(),
        WebhookReply::Forbidden(_) => StatusCode::FORBIDDEN.into_response(),
        WebhookReply::Malformed(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
    }
}

async fn health_handler(State(service): State<Arc<PresenceService>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "live_announcements": service.announcements().tracked_count(),
        "webhook_in_flight": service.webhook().in_flight(),
    }))
}
