//! HTTP control API.
//!
//! Reads session state from the [`SessionManager`] and hands sends to the
//! [`OutboundGateway`]. Handlers own no state of their own.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::outbound::{OutboundError, OutboundGateway};
use crate::session::SessionManager;
use crate::state::{CounterSnapshot, MessageCounters};
use crate::store::StoreError;

pub const LOGOUT_MESSAGE: &str = "Logged out. Restart bridge to re-pair.";

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
    pub gateway: Arc<OutboundGateway>,
    pub counters: Arc<MessageCounters>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        sessions: Arc<SessionManager>,
        gateway: Arc<OutboundGateway>,
        counters: Arc<MessageCounters>,
    ) -> Self {
        Self {
            sessions,
            gateway,
            counters,
            started_at: Utc::now(),
        }
    }

    fn uptime(&self) -> f64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Every failure answers `{error}`; only unknown routes get a 404.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,
    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),
    #[error(transparent)]
    Outbound(#[from] OutboundError),
    #[error("failed to clear credentials: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub error: Option<String>,
    pub messages: CounterSnapshot,
    pub uptime: f64,
}

#[derive(Serialize)]
pub struct QrResponse {
    pub status: &'static str,
    pub qr: Option<String>,
    pub qr_base64: Option<String>,
}

#[derive(Deserialize)]
struct SendBody {
    to: String,
    message: String,
}

#[derive(Deserialize)]
struct SendImageBody {
    to: String,
    image_url: String,
    #[serde(default)]
    caption: String,
}

/// Creates the control API router.
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/status", get(status_handler).fallback(not_found))
        .route("/qr", get(qr_handler).fallback(not_found))
        .route("/send", post(send_handler).fallback(not_found))
        .route("/send-image", post(send_image_handler).fallback(not_found))
        .route("/logout", post(logout_handler).fallback(not_found))
        .route("/health", get(health_handler).fallback(not_found))
        .fallback(not_found)
        .layer(middleware::from_fn(preflight))
        .layer(cors)
        .with_state(state)
}

/// Answer any OPTIONS request with an empty 200.
async fn preflight(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    let session = state.sessions.snapshot();
    Json(StatusResponse {
        status: session.state().as_str(),
        error: session.last_error().map(str::to_string),
        messages: state.counters.snapshot(),
        uptime: state.uptime(),
    })
}

async fn qr_handler(State(state): State<ApiState>) -> Json<QrResponse> {
    let session = state.sessions.snapshot();
    Json(QrResponse {
        status: session.state().as_str(),
        qr: session.pairing_artifact().map(str::to_string),
        qr_base64: session.pairing_image().map(str::to_string),
    })
}

async fn send_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body: SendBody = serde_json::from_slice(&body)?;
    state.gateway.send_text(&body.to, &body.message).await?;
    Ok(Json(json!({ "success": true })))
}

async fn send_image_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body: SendImageBody = serde_json::from_slice(&body)?;
    state
        .gateway
        .send_image(&body.to, &body.image_url, &body.caption)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn logout_handler(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.logout().await?;
    Ok(Json(json!({ "success": true, "message": LOGOUT_MESSAGE })))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "pid": std::process::id() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::protocol::mock::{settle, MockConnector, RecordingWebhook};
    use crate::protocol::OutgoingContent;
    use crate::relay::MessageRelay;
    use crate::store::MemoryCredentialStore;
    use crate::types::{ConnectionPhase, ConnectionUpdate, ProtocolEvent};

    struct Harness {
        app: Router,
        connector: Arc<MockConnector>,
        counters: Arc<MessageCounters>,
    }

    async fn harness() -> Harness {
        let connector = Arc::new(MockConnector::default());
        let counters = Arc::new(MessageCounters::new());
        let relay = Arc::new(MessageRelay::new(
            Arc::new(RecordingWebhook::default()),
            Arc::clone(&counters),
        ));
        let sessions = SessionManager::spawn(
            connector.clone(),
            Arc::new(MemoryCredentialStore::new()),
            relay,
        );
        sessions.start();
        settle().await;

        let gateway = Arc::new(OutboundGateway::new(sessions.clone(), Arc::clone(&counters)));
        let state = ApiState::new(sessions, gateway, Arc::clone(&counters));
        Harness {
            app: create_router(state),
            connector,
            counters,
        }
    }

    async fn update(h: &Harness, update: ConnectionUpdate) {
        h.connector
            .last()
            .events
            .send(ProtocolEvent::ConnectionUpdate(update))
            .await
            .unwrap();
        settle().await;
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_status_reports_state_and_counters() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "connecting");
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["messages"], json!({ "in": 0, "out": 0 }));
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);

        update(&h, ConnectionUpdate::closed(Some(408), "timed out")).await;
        let (_, body) = call(&h.app, Method::GET, "/status", None).await;
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["error"], "timed out");
    }

    #[tokio::test]
    async fn test_qr_only_while_pairing() {
        let h = harness().await;
        let (_, body) = call(&h.app, Method::GET, "/qr", None).await;
        assert_eq!(body, json!({ "status": "connecting", "qr": null, "qr_base64": null }));

        update(&h, ConnectionUpdate::pairing("2@ref")).await;
        let (_, body) = call(&h.app, Method::GET, "/qr", None).await;
        assert_eq!(body["status"], "qr_ready");
        assert_eq!(body["qr"], "2@ref");
        assert!(body["qr_base64"]
            .as_str()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));

        update(&h, ConnectionUpdate::phase(ConnectionPhase::Open)).await;
        let (_, body) = call(&h.app, Method::GET, "/qr", None).await;
        assert_eq!(body, json!({ "status": "connected", "qr": null, "qr_base64": null }));
    }

    #[tokio::test]
    async fn test_qr_without_image_when_rendering_fails() {
        let h = harness().await;
        let qr = "x".repeat(8000);
        update(&h, ConnectionUpdate::pairing(qr.clone())).await;

        let (status, body) = call(&h.app, Method::GET, "/qr", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "qr_ready", "qr": qr, "qr_base64": null }));

        let (_, body) = call(&h.app, Method::GET, "/status", None).await;
        assert_eq!(body["status"], "qr_ready");
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let h = harness().await;
        let (status, body) = call(
            &h.app,
            Method::POST,
            "/send",
            Some(r#"{"to":"5511999998888","message":"oi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "WhatsApp not connected" }));
        assert_eq!(h.counters.snapshot().outbound, 0);
    }

    #[tokio::test]
    async fn test_send_and_send_image_when_connected() {
        let h = harness().await;
        update(&h, ConnectionUpdate::phase(ConnectionPhase::Open)).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/send",
            Some(r#"{"to":"+5511999998888","message":"luz acesa"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, _) = call(
            &h.app,
            Method::POST,
            "/send-image",
            Some(r#"{"to":"5511999998888","image_url":"https://cam/snap.jpg"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let sent = h.connector.last().session.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "5511999998888@s.whatsapp.net");
        assert_eq!(sent[1].1, OutgoingContent::image("https://cam/snap.jpg", ""));
        assert_eq!(h.counters.snapshot().outbound, 1);

        let (_, body) = call(&h.app, Method::GET, "/status", None).await;
        assert_eq!(body["messages"], json!({ "in": 0, "out": 1 }));
    }

    #[tokio::test]
    async fn test_empty_message_succeeds_and_counts() {
        let h = harness().await;
        update(&h, ConnectionUpdate::phase(ConnectionPhase::Open)).await;

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/send",
            Some(r#"{"to":"5511999998888","message":""}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert!(h.connector.last().session.sent().is_empty());
        assert_eq!(h.counters.snapshot().outbound, 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_500() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::POST, "/send", Some("{not json")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("invalid request body"));

        let (status, _) = call(&h.app, Method::POST, "/send-image", Some(r#"{"to":"1"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_logout() {
        let h = harness().await;
        update(&h, ConnectionUpdate::phase(ConnectionPhase::Open)).await;

        let (status, body) = call(&h.app, Method::POST, "/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "message": LOGOUT_MESSAGE }));
        assert_eq!(
            h.connector.link(0).session.logouts.load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        let (_, body) = call(&h.app, Method::GET, "/status", None).await;
        assert_eq!(body["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, body) = call(&h.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["pid"], std::process::id());
    }

    #[tokio::test]
    async fn test_unknown_routes_and_methods_are_404() {
        let h = harness().await;
        for (method, uri) in [
            (Method::GET, "/nope"),
            (Method::GET, "/send"),
            (Method::POST, "/status"),
            (Method::DELETE, "/logout"),
        ] {
            let (status, body) = call(&h.app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, json!({ "error": "Not found" }));
        }
    }

    #[tokio::test]
    async fn test_options_is_empty_200_with_cors() {
        let h = harness().await;
        for uri in ["/send", "/anything"] {
            let response = h
                .app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(uri)
                        .header(header::ORIGIN, "http://homeassistant.local")
                        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
                "*"
            );
        }

        let (status, body) = call(&h.app, Method::OPTIONS, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }
}
