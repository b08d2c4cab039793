//! HTTP front for the admission gate
//!
//! `POST /private_search` wraps the request into a gateway-shaped event
//! (headers, raw body, request context) and hands it to
//! [`AdmissionGate::admit`]. The gate's status code and body are returned
//! as-is.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use relay_core::{AdmissionGate, GateResponse};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Admission gate
    pub gate: Arc<AdmissionGate>,
    /// Stage name reported in `requestContext.stage`
    pub stage: String,
}

/// Build the router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/private_search", post(private_search))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn private_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let event = request_event(&headers, body, &state.stage);
    gate_response(state.gate.admit(event).await)
}

async fn health_check() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "relay-daemon",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Gateway-shaped event for one HTTP request
///
/// Header values that are not valid UTF-8 are dropped.
fn request_event(headers: &HeaderMap, body: String, stage: &str) -> Value {
    let mut header_map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }

    let mut context = Map::new();
    if let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        context.insert("domainName".to_string(), Value::String(host.to_string()));
    }
    context.insert("stage".to_string(), Value::String(stage.to_string()));

    json!({
        "headers": header_map,
        "body": body,
        "requestContext": context,
    })
}

fn gate_response(response: GateResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        Some(body) => (status, body).into_response(),
        None => (status, Body::empty()).into_response(),
    }
}
