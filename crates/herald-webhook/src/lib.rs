//! Monitoring webhook receiver.
//!
//! Accepts JSON payloads from a monitoring system over HTTP, flattens them
//! into readable text and broadcasts them to the subscribers of one
//! notification type.

use std::{future::Future, sync::Arc};

use anyhow::Context;
use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use serde_json::Value;
use tokio::net::TcpListener;

use herald_core::{config::WebhookConfig, errors::Error, notify::NotificationService};

#[derive(Clone)]
pub struct WebhookState {
    pub notifier: Arc<NotificationService>,
    pub notification_type: String,
}

pub fn router(endpoint: &str, state: WebhookState) -> Router {
    Router::new()
        .route(endpoint, post(receive))
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve(
    cfg: &WebhookConfig,
    notifier: Arc<NotificationService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("failed to bind webhook listener on {}:{}", cfg.host, cfg.port))?;

    let state = WebhookState {
        notifier,
        notification_type: cfg.notification_type.clone(),
    };
    serve_on(listener, &cfg.endpoint, state, shutdown).await
}

pub async fn serve_on(
    listener: TcpListener,
    endpoint: &str,
    state: WebhookState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    tracing::info!(
        addr = %listener.local_addr()?,
        endpoint,
        notification_type = %state.notification_type,
        "webhook listening"
    );

    axum::serve(listener, router(endpoint, state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("webhook server failed")?;

    tracing::info!("webhook stopped");
    Ok(())
}

async fn receive(State(state): State<WebhookState>, body: Bytes) -> (StatusCode, String) {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, bytes = body.len(), "rejected webhook body");
            return (StatusCode::BAD_REQUEST, "invalid JSON payload".to_string());
        }
    };

    let details = format_json(&payload);
    if details.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "empty payload".to_string());
    }
    let text = format!("❗️ Monitoring notification:\n\n{details}");

    match state.notifier.notify(&state.notification_type, &text).await {
        Ok(report) => (
            StatusCode::OK,
            format!("✅ Webhook received. {}", report.summary()),
        ),
        Err(Error::NotFound(what)) => {
            tracing::error!(%what, "webhook notification type is not configured");
            (StatusCode::NOT_FOUND, format!("{what} not found"))
        }
        Err(e @ Error::BroadcastTooLarge { .. }) => {
            tracing::warn!(error = %e, "webhook broadcast rejected");
            (StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
        }
        Err(e @ Error::Pool(_)) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "webhook broadcast failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "broadcast failed".to_string())
        }
    }
}

/// Flatten a JSON document into indented `key: value` lines.
///
/// Nested objects and arrays indent by two spaces per level, array items are
/// prefixed with `- `, and literal `\n` sequences in strings become newlines.
pub fn format_json(value: &Value) -> String {
    format_level(value, 0)
}

fn format_level(value: &Value, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();

    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::Object(_) | Value::Array(_) => {
                        lines.push(format!("{indent}{key}:"));
                        let nested = format_level(v, depth + 1);
                        if !nested.is_empty() {
                            lines.push(nested);
                        }
                    }
                    scalar => lines.push(format!("{indent}{key}: {}", scalar_text(scalar))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                lines.push(format!(
                    "{indent}- {}",
                    format_level(item, depth + 1).trim()
                ));
            }
        }
        scalar => lines.push(format!("{indent}{}", scalar_text(scalar))),
    }

    lines.join("\n")
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.replace("\\n", "\n"),
        other => other.to_string(),
    }
}
