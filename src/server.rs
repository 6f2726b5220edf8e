use crate::archive::DigestArchive;
use crate::dispatch::DigestPipeline;
use crate::storage_utils::ServerConfig;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const SECRET_HEADER: &str = "x-trigger-secret";

/// Shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DigestPipeline>,
    pub archive: Arc<dyn DigestArchive>,
    pub trigger_secret: Arc<str>,
    // one manual run at a time
    pub run_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/trigger", get(trigger_handler).post(trigger_handler))
        .route("/archive", get(archive_index_handler))
        .route("/archive/{date}", get(archive_entry_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    info!("Registering routes:");
    info!("  GET  /health");
    info!("  GET|POST /trigger (requires {} header or ?secret=)", SECRET_HEADER);
    info!("  GET  /archive");
    info!("  GET  /archive/{{date}}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

fn secret_matches(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    // constant time over equal-length inputs
    expected.len() == provided.len()
        && expected
            .bytes()
            .zip(provided.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Runs the digest synchronously and reports the outcome as plain text.
pub async fn trigger_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TriggerQuery>,
) -> Response {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.secret.as_deref());

    if !secret_matches(&state.trigger_secret, provided) {
        warn!("Rejected manual trigger with bad or missing secret");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let _guard = state.run_lock.lock().await;
    let date = Utc::now().date_naive();
    info!(%date, "Manual trigger");

    match state.pipeline.run(date).await {
        Ok(summary) => (
            StatusCode::OK,
            format!(
                "Daily digest executed successfully. Sent {} of {} emails.",
                summary.sent, summary.subscribers
            ),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Manual run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}

pub async fn archive_index_handler(State(state): State<AppState>) -> Response {
    let dates = match state.archive.dates().await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "Failed to list archive");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Archive unavailable").into_response();
        }
    };

    let items: String = if dates.is_empty() {
        "<p>No signals archived yet.</p>".to_string()
    } else {
        let links: Vec<String> = dates
            .iter()
            .map(|d| format!(r#"<li><a href="/archive/{d}">{d}</a> Daily Market Analysis</li>"#, d = d))
            .collect();
        format!("<ul>{}</ul>", links.join(""))
    };

    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Signal Archive</title></head>\
         <body><h1>Signal Archive</h1>{}</body></html>",
        items
    ))
    .into_response()
}

pub async fn archive_entry_handler(State(state): State<AppState>, Path(date): Path<String>) -> Response {
    let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
        return (StatusCode::BAD_REQUEST, "Date must be YYYY-MM-DD").into_response();
    };

    match state.archive.get(date).await {
        Ok(Some(html)) => Html(html).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Err(e) => {
            error!(%date, error = %e, "Failed to read archive entry");
            (StatusCode::INTERNAL_SERVER_ERROR, "Archive unavailable").into_response()
        }
    }
}
