//! HTTP webhook gateway.
//!
//! Exposes the event-subscription endpoint the platform delivers message
//! events to, plus a health check. Each delivery passes the idempotency
//! gate before any model or tool work starts; redeliveries of an already
//! claimed message id are acknowledged without side effects.
//!
//! Built on Axum.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

use larkrelay_agent::Driver;
use larkrelay_core::message::InboundMessage;
use larkrelay_core::reply::ReplyTarget;
use larkrelay_core::store::IdempotencyStore;
use larkrelay_core::toolhost::ToolHost;

const PARSE_FAILED_MSG: &str =
    "解析消息失败，请发送文本消息\nparse message failed, please send text message";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub store: Arc<dyn IdempotencyStore>,
    pub driver: Arc<Driver>,
    pub toolhost: Arc<dyn ToolHost>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/im/v1/p2_im_message_receive_v1",
            post(receive_handler),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start(
    state: SharedState,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The event-subscription envelope. A URL-verification probe carries
/// `type` and `challenge`; a message delivery carries `event`.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<EventBody>,
}

#[derive(Debug, Deserialize)]
struct EventBody {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: String,
    message_type: String,
    content: String,
    chat_type: String,
    chat_id: String,
}

/// The `{code: -1}` acknowledgement for deliveries that are rejected
/// without model or tool work.
fn rejected(msg: impl Into<String>) -> Json<Value> {
    Json(json!({ "code": -1, "msg": msg.into() }))
}

async fn receive_handler(
    State(state): State<SharedState>,
    Json(payload): Json<EventEnvelope>,
) -> Result<Json<Value>, StatusCode> {
    if payload.event_type.as_deref() == Some("url_verification") {
        let challenge = payload.challenge.unwrap_or_default();
        return Ok(Json(json!({ "challenge": challenge })));
    }

    let Some(event) = payload.event else {
        warn!("Event payload missing message body");
        return Ok(rejected(PARSE_FAILED_MSG));
    };

    let message = InboundMessage {
        message_id: event.message.message_id,
        message_type: event.message.message_type,
        content: event.message.content,
        chat_type: event.message.chat_type,
        chat_id: event.message.chat_id,
    };

    // Idempotency gate: exactly one delivery of a message id proceeds.
    // The claim is recorded before the content is inspected, so a
    // redelivered unparseable message is also rejected as a duplicate.
    let claimed = state.store.claim(&message).await.map_err(|e| {
        error!(error = %e, "Idempotency claim failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if !claimed {
        info!(message_id = %message.message_id, "Duplicate delivery ignored");
        return Ok(rejected(format!(
            "message_id: {}已处理",
            message.message_id
        )));
    }

    let Some(text) = message.text() else {
        return Ok(rejected(PARSE_FAILED_MSG));
    };

    let target = ReplyTarget {
        chat_id: message.chat_id.clone(),
        message_id: message.message_id.clone(),
        chat_type: message.chat_type(),
    };

    let session = state.toolhost.open().await.map_err(|e| {
        error!(error = %e, "Tool host session open failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // The session is closed on both outcomes before the result is
    // inspected.
    let result = state.driver.run(&text, session.as_ref(), &target).await;
    session.close().await;

    match result {
        Ok(outcome) => Ok(Json(json!({
            "code": 0,
            "msg": "success",
            "data": outcome.history,
        }))),
        Err(e) => {
            error!(message_id = %message.message_id, error = %e, "Driver run failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
