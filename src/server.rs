// src/server.rs
//
// HTTP serve mode: accepts an order as JSON and runs the full flow. Each
// request gets a fresh browser session; the single lock keeps one flow in
// flight at a time because a session owns the machine's one browser profile.

use crate::driver::{cleanup_driver, init_driver};
use crate::flow::{AddReport, CheckoutFlow, FlowConfig, FlowResult};
use crate::login;
use crate::site::SiteConfig;
use crate::web::WebSession;
use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
struct AppState {
    order_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
struct OrderRequest {
    urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    status: &'static str,
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    report: AddReport,
}

pub fn app() -> Router {
    Router::new()
        .route("/order", post(create_order))
        .route("/health", get(health))
        .with_state(AppState { order_lock: Arc::new(Mutex::new(())) })
}

pub async fn serve() -> Result<()> {
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!("🚀 Listening on {addr}");
    axum::serve(listener, app()).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<OrderResponse>, (StatusCode, String)> {
    if req.urls.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No product URLs provided.".to_string()));
    }

    let _guard = state.order_lock.lock().await;
    let (report, result) = process_order(&req.urls)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;

    println!("📦 Order processed: {} ({:?})", result.kind(), report);
    Ok(Json(OrderResponse {
        status: "OK",
        result: result.kind(),
        reason: result.reason(),
        report,
    }))
}

/// Run one complete order: fresh session, login, add items, checkout. The
/// session is torn down on every path, including after a fatal login error.
pub async fn process_order(urls: &[String]) -> Result<(AddReport, FlowResult)> {
    let site = SiteConfig::from_env()?;
    let config = FlowConfig::from_env();

    let mut bundle = init_driver().await?;
    let outcome = run_flow(&bundle, site, config, urls).await;
    cleanup_driver(&mut bundle).await;
    outcome
}

async fn run_flow(
    bundle: &crate::driver::DriverBundle,
    site: SiteConfig,
    config: FlowConfig,
    urls: &[String],
) -> Result<(AddReport, FlowResult)> {
    login::login(&bundle.driver, &site).await?;

    let session = WebSession::new(bundle.driver.clone());
    let flow = CheckoutFlow::new(&session, site, config);
    let report = flow.add_items(urls).await;
    let result = flow.checkout().await;
    Ok((report, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn empty_order_is_rejected_before_a_session_starts() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/order")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"urls":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_order_body_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/order")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"items":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
