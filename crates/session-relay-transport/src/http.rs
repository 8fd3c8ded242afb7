//! HTTP control surface.
//!
//! `/`, `/health` and `/qr` are public; everything under `/api` requires
//! `Authorization: Bearer <api token>`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use session_relay_core::{MessageTemplates, SessionState, StatsSnapshot};
use session_relay_session::{SendError, SessionManager};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    page::INDEX_HTML,
    protocol::{
        ErrorBody, HealthResponse, QrResponse, ReconnectResponse, SendMessageRequest,
        SendResponse, SendSignatureRequest, SendVerificationRequest,
    },
};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub api_token: Arc<str>,
    pub templates: Arc<MessageTemplates>,
}

impl AppState {
    #[must_use]
    pub fn new(manager: SessionManager, api_token: &str, templates: MessageTemplates) -> Self {
        Self {
            manager,
            api_token: Arc::from(api_token),
            templates: Arc::new(templates),
        }
    }
}

/// Error returned by a handler, rendered as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Session not connected (state: {0})")]
    NotReady(SessionState),
    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn missing(fields: &[&str]) -> Self {
        Self::BadRequest(format!("Missing required fields: {}", fields.join(", ")))
    }
}

impl From<SendError> for ApiError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NotReady(state) => Self::NotReady(state),
            SendError::Client(e) => Self::SendFailed(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .route("/send-message", post(send_message))
        .route("/send-signature", post(send_signature))
        .route("/send-verification", post(send_verification))
        .route("/reconnect", post(reconnect))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/qr", get(qr))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = !state.api_token.is_empty()
        && request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == &*state.api_token);

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated request");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: state.manager.stats(),
    })
}

async fn qr(State(state): State<AppState>) -> Json<QrResponse> {
    Json(QrResponse {
        qr: state.manager.qr_code(),
        state: state.manager.state(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.manager.stats())
}

async fn send_message(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(req) = body?;
    let missing = req.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::missing(&missing));
    }
    let (to, message) = (req.to.unwrap_or_default(), req.message.unwrap_or_default());
    deliver(&state, &to, &message).await
}

async fn send_signature(
    State(state): State<AppState>,
    body: Result<Json<SendSignatureRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(req) = body?;
    let missing = req.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::missing(&missing));
    }
    let message = state.templates.signature_request(
        req.doctor_name.as_deref().unwrap_or_default(),
        req.signature_url.as_deref().unwrap_or_default(),
    );
    deliver(&state, req.to.as_deref().unwrap_or_default(), &message).await
}

async fn send_verification(
    State(state): State<AppState>,
    body: Result<Json<SendVerificationRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(req) = body?;
    let missing = req.missing_fields();
    if !missing.is_empty() {
        return Err(ApiError::missing(&missing));
    }
    let message = state
        .templates
        .verification_code(req.code.as_deref().unwrap_or_default());
    deliver(&state, req.to.as_deref().unwrap_or_default(), &message).await
}

async fn deliver(state: &AppState, to: &str, body: &str) -> Result<Json<SendResponse>, ApiError> {
    let receipt = state.manager.send_text(to, body).await?;
    Ok(Json(receipt.into()))
}

async fn reconnect(State(state): State<AppState>) -> Json<ReconnectResponse> {
    state.manager.force_reconnect();
    Json(ReconnectResponse {
        success: true,
        message: "Reconnection initiated",
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use serde_json::{Value, json};
    use session_relay_core::{ConnectionInfo, config::BackendConfig};
    use session_relay_session::{
        BackendNotifier, LoopbackFactory, ManagerOptions, MemoryGuard, memory::FixedProbe,
    };
    use tower::ServiceExt;

    use super::*;

    const TOKEN: &str = "test-token";

    fn state_with(factory: &LoopbackFactory, notifier: BackendNotifier) -> AppState {
        let manager = SessionManager::new(
            Arc::new(factory.clone()),
            notifier,
            Arc::new(MemoryGuard::new(FixedProbe::megabytes(16), 450)),
            ManagerOptions {
                artifacts_dir: None,
                ..ManagerOptions::default()
            },
        );
        AppState::new(manager, TOKEN, MessageTemplates::new("Relay"))
    }

    async fn wait_for_state(state: &AppState, expected: SessionState) {
        for _ in 0..200 {
            if state.manager.state() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("manager never reached {expected}");
    }

    async fn ready_state(notifier: BackendNotifier) -> (AppState, LoopbackFactory) {
        let factory = LoopbackFactory::auto_pairing(ConnectionInfo::new("Relay Bot", "336"));
        let state = state_with(&factory, notifier);
        state.manager.initialize();
        wait_for_state(&state, SessionState::Ready).await;
        (state, factory)
    }

    fn post(uri: &str, body: &Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str, authorized: bool) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri(uri);
        if authorized {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(state: &AppState, request: axum::http::Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_send_message_succeeds_with_unreachable_backend() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_ms: 200,
            ..BackendConfig::default()
        };
        let (state, factory) = ready_state(BackendNotifier::new(&config, TOKEN)).await;

        let (status, body) = call(
            &state,
            post("/api/send-message", &json!({ "to": "33612345678", "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["messageId"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(body["timestamp"].is_i64());
        assert_eq!(factory.sent()[0].chat_id, "33612345678@c.us");
    }

    #[tokio::test]
    async fn test_send_verification_while_disconnected_is_503() {
        let factory = LoopbackFactory::new();
        let state = state_with(&factory, BackendNotifier::disabled());
        state.manager.initialize();
        for _ in 0..200 {
            if factory.started() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(factory.emit_disconnected("LOGOUT"));
        wait_for_state(&state, SessionState::ReconnectScheduled).await;

        let (status, body) = call(
            &state,
            post("/api/send-verification", &json!({ "to": "33600000000", "code": "1234" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
        assert!(factory.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_are_400_before_readiness() {
        let factory = LoopbackFactory::new();
        let state = state_with(&factory, BackendNotifier::disabled());

        let (status, body) = call(
            &state,
            post("/api/send-signature", &json!({ "to": "336", "doctorName": "Dr Who" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields: signatureUrl");

        let (status, _) = call(&state, post("/api/send-message", &json!("not an object"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_failure_is_500_with_detail() {
        let (state, factory) = ready_state(BackendNotifier::disabled()).await;
        factory.set_send_failure(true);

        let (status, body) = call(
            &state,
            post("/api/send-message", &json!({ "to": "336", "message": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("loopback send failure"));
    }

    #[tokio::test]
    async fn test_signature_template_is_sent() {
        let (state, factory) = ready_state(BackendNotifier::disabled()).await;
        let (status, _) = call(
            &state,
            post(
                "/api/send-signature",
                &json!({
                    "to": "336",
                    "doctorName": "Dr Martin",
                    "signatureUrl": "https://sign.test/abc",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let sent = factory.sent();
        assert!(sent[0].body.contains("Dr Martin"));
        assert!(sent[0].body.contains("https://sign.test/abc"));
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let factory = LoopbackFactory::new();
        let state = state_with(&factory, BackendNotifier::disabled());

        let (status, body) = call(&state, get_req("/api/status", false)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let wrong = axum::http::Request::builder()
            .uri("/api/status")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&state, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&state, get_req("/api/status", true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "uninitialized");
        assert_eq!(body["connected"], false);
    }

    #[tokio::test]
    async fn test_health_and_qr_are_public() {
        let (state, _factory) = ready_state(BackendNotifier::disabled()).await;

        let (status, body) = call(&state, get_req("/health", false)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connected"], true);
        assert_eq!(body["connection"]["displayName"], "Relay Bot");

        let (status, body) = call(&state, get_req("/qr", false)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ready");
        assert!(body["qr"].is_null());

        let response = router(state.clone())
            .oneshot(get_req("/", false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reconnect_is_fire_and_forget() {
        let (state, factory) = ready_state(BackendNotifier::disabled()).await;

        let (status, body) = call(&state, post("/api/reconnect", &json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        for _ in 0..200 {
            if factory.created() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.destroyed(), 1);
    }
}
