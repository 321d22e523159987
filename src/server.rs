//! HTTP surface: the WhatsApp webhook and the registration analytics
//! REST endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::analytics::{self, MAX_DAYS, MIN_DAYS};
use crate::channels::whatsapp::parse_webhook_payload;
use crate::router::Router as MessageRouter;
use crate::store::Database;

/// Shared state for all HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub db: Arc<dyn Database>,
    pub verify_token: String,
}

/// GET /webhook
///
/// Meta's subscription handshake: echo `hub.challenge` when the verify
/// token matches.
async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == Some("subscribe") && token == Some(state.verify_token.as_str()) {
        (StatusCode::OK, challenge).into_response()
    } else {
        tracing::warn!("webhook verification failed");
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "verification failed"})),
        )
            .into_response()
    }
}

/// POST /webhook
///
/// Cloud API delivery. Messages are processed in order; a handler
/// failure is logged but still acknowledged, so Meta doesn't redeliver.
async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let messages = match parse_webhook_payload(&payload) {
        Ok(messages) => messages,
        Err(err) => {
            tracing::warn!(%err, "rejecting malformed webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    for message in messages {
        if let Err(err) = state.router.handle_message(message).await {
            tracing::error!(%err, "failed to handle inbound message");
        }
    }
    StatusCode::OK.into_response()
}

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    days: Option<u32>,
    format: Option<String>,
}

/// Validated analytics query: the window in days and whether the
/// detailed format was requested.
fn validate_query(query: &AnalyticsQuery) -> Result<(u32, bool), String> {
    let days = query.days.unwrap_or(30);
    if !(MIN_DAYS..=MAX_DAYS).contains(&days) {
        return Err(format!(
            "days must be between {MIN_DAYS} and {MAX_DAYS}"
        ));
    }
    let detailed = match query.format.as_deref() {
        None | Some("summary") => false,
        Some("detailed") => true,
        Some(other) => {
            return Err(format!(
                "format must be 'summary' or 'detailed', got '{other}'"
            ))
        }
    };
    Ok((days, detailed))
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// GET /api/registration/analytics/summary
async fn registration_summary(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> impl IntoResponse {
    let (days, detailed) = match validate_query(&query) {
        Ok(v) => v,
        Err(message) => return bad_request(message),
    };
    let since = Utc::now() - Duration::days(days as i64);
    match state.db.list_registration_tasks(since).await {
        Ok(rows) => Json(analytics::summarize(&rows, days, detailed)).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to load registration tasks");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// GET /api/registration/analytics/funnel
async fn registration_funnel(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> impl IntoResponse {
    let (days, _) = match validate_query(&query) {
        Ok(v) => v,
        Err(message) => return bad_request(message),
    };
    let since = Utc::now() - Duration::days(days as i64);
    match state.db.list_registration_tasks(since).await {
        Ok(rows) => Json(analytics::funnel(&rows, days)).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to load registration tasks");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the full HTTP application.
pub fn app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route(
            "/api/registration/analytics/summary",
            get(registration_summary),
        )
        .route(
            "/api/registration/analytics/funnel",
            get(registration_funnel),
        )
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
