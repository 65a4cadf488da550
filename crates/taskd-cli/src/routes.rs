//! HTTP surface.
//!
//! - `POST /api`: JSON command protocol (single request or batch)
//! - `GET /status`: task counts by status
//! - `GET /health`: heartbeat

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use taskd_core::app::{Dispatcher, StatusCounts};
use taskd_core::domain::Outgoing;
use taskd_core::impls::MemoryTaskStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub type AppState = Arc<Dispatcher<MemoryTaskStore>>;

pub fn build(state: AppState) -> Router {
    // the dashboard is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .route("/api", post(api))
        .route("/status", get(status))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Every outcome, including malformed JSON, is an envelope with HTTP 200.
pub async fn api(State(dispatcher): State<AppState>, body: Bytes) -> Json<Outgoing> {
    Json(dispatcher.handle_json(&body).await)
}

pub async fn status(State(dispatcher): State<AppState>) -> Json<StatusCounts> {
    Json(dispatcher.counts())
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskd_core::app::{Daemon, DaemonBuilder};
    use taskd_core::config::Config;

    async fn daemon() -> Daemon<MemoryTaskStore> {
        DaemonBuilder::new(Config::default()).build().await.unwrap()
    }

    #[tokio::test]
    async fn api_runs_a_batch_in_order() {
        let daemon = daemon().await;
        let body = json!([
            {"command": {"Add": {"id": 1, "name": "demo", "command": "true"}}},
            {"command": {"List": null}}
        ]);
        let Json(out) = api(State(daemon.dispatcher()), Bytes::from(body.to_string())).await;
        let value = serde_json::to_value(out).unwrap();
        assert_eq!(value[0]["code"], 10000);
        assert_eq!(value[1]["data"]["Status"][0]["name"], "demo");

        let Json(counts) = status(State(daemon.dispatcher())).await;
        assert_eq!(counts.added, 1);
        daemon.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn malformed_body_is_an_envelope() {
        let daemon = daemon().await;
        let Json(out) = api(State(daemon.dispatcher()), Bytes::from_static(b"nope")).await;
        let value = serde_json::to_value(out).unwrap();
        assert_eq!(value["code"], 40000);
        assert_eq!(value["data"]["Error"]["kind"], "invalid_request");
        daemon.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
