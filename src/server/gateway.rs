//! Gateway HTTP surface.
//!
//! - `GET /publish` - trigger a publish of the configured test payload;
//!   returns no body, publish failure surfaces as an error status
//! - `POST /publish` - publish the request body as the message payload
//! - `GET /healthz` - liveness plus subscriber state
//! - `GET /metrics` - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::Error;
use crate::metrics::get_metrics;
use crate::pubsub::{Publisher, Subscriber};
use crate::server::shutdown::shutdown_receiver;
use crate::types::MessageAttributes;

/// Gateway server configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to (e.g., "127.0.0.1:8080").
    pub bind_address: String,
    /// Payload published by the `GET /publish` trigger.
    pub test_payload: String,
}

/// Shared gateway state.
#[derive(Clone)]
pub struct GatewayState {
    publisher: Arc<Publisher>,
    subscriber: Option<Arc<Subscriber>>,
    test_payload: Arc<str>,
}

impl GatewayState {
    /// Create gateway state. `subscriber` is optional so one-shot publish
    /// deployments can run the gateway without a consumer.
    pub fn new(
        publisher: Arc<Publisher>,
        subscriber: Option<Arc<Subscriber>>,
        test_payload: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            test_payload: test_payload.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    subscriber_state: Option<String>,
}

/// Publish response for `POST /publish`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedResponse {
    message_id: String,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

/// Error detail information
#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: u16,
    message: String,
    status: String,
}

impl ErrorResponse {
    fn from_error(error: &Error) -> Self {
        // Upstream messaging failures are a bad gateway from the caller's
        // point of view; anything else is internal.
        let (code, status) = match error {
            Error::Auth(_) | Error::Connect(_) | Error::Publish(_) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        Self {
            error: ErrorDetail {
                code: code.as_u16(),
                message: error.to_string(),
                status: status.to_string(),
            },
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Create the gateway router.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/publish", get(trigger_publish).post(publish_body))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Publish the configured test payload. No body on success.
async fn trigger_publish(State(state): State<GatewayState>) -> Response {
    let mut attributes = MessageAttributes::new();
    attributes.insert("request_id".to_string(), Uuid::new_v4().to_string());

    match state
        .publisher
        .publish(state.test_payload.as_bytes().to_vec(), attributes)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "trigger publish failed");
            ErrorResponse::from_error(&e).into_response()
        }
    }
}

/// Publish the request body and return the broker-assigned message ID.
async fn publish_body(State(state): State<GatewayState>, body: Bytes) -> Response {
    let mut attributes = MessageAttributes::new();
    attributes.insert("request_id".to_string(), Uuid::new_v4().to_string());

    match state.publisher.publish(body.to_vec(), attributes).await {
        Ok(message_id) => Json(PublishedResponse { message_id }).into_response(),
        Err(e) => {
            error!(error = %e, "publish failed");
            ErrorResponse::from_error(&e).into_response()
        }
    }
}

async fn healthz(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscriber_state: state
            .subscriber
            .as_ref()
            .map(|subscriber| subscriber.state().to_string()),
    })
}

async fn metrics() -> Response {
    match get_metrics().gather() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Start the gateway server. Runs until the shutdown signal fires.
pub async fn start_gateway_server(
    config: GatewayConfig,
    state: GatewayState,
    shutdown: broadcast::Receiver<()>,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            crate::Error::Config(format!("cannot bind {}: {}", config.bind_address, e))
        })?;

    let addr = listener
        .local_addr()
        .map_err(|e| crate::Error::Internal(format!("cannot read local address: {}", e)))?;
    info!("Starting gateway server on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_receiver(shutdown))
        .await
        .map_err(|e| crate::Error::Internal(format!("gateway server error: {}", e)))?;

    info!("Gateway server stopped");
    Ok(())
}
