//! HTTP routes for the Events API (webhook / serverless) entry point.
//!
//! - `GET /health`: liveness
//! - `POST /slack/events`: Events API requests
//!
//! Slack expects an answer within three seconds and redelivers otherwise,
//! marking redeliveries with `X-Slack-Retry-Num`. Redeliveries are answered
//! immediately and never processed, so a slow answer is not produced twice.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::bridge::MentionBridge;
use crate::message::EventsApiPayload;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Maximum age of a signed request, in seconds.
const MAX_SIGNATURE_AGE_SECS: i64 = 5 * 60;

// ============================================================================
// State
// ============================================================================

/// Shared state for the HTTP adapter.
pub struct AppState {
    pub bridge: Arc<MentionBridge>,
    /// Signing secret. When unset, requests are not verified.
    pub signing_secret: Option<String>,
}

impl AppState {
    pub fn new(bridge: Arc<MentionBridge>, signing_secret: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            signing_secret: signing_secret.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

// ============================================================================
// Signature Verification
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// HMAC over Slack's `v0:{timestamp}:{body}` base string.
fn signed_mac(signing_secret: &str, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes()).ok()?;
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    Some(mac)
}

/// Compute the `X-Slack-Signature` value for a request.
pub fn compute_signature(signing_secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    signed_mac(signing_secret, timestamp, body)
        .map(|mac| format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify Slack request signing headers against the raw body.
fn verify_slack_signature(
    signing_secret: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(timestamp), Some(signature)) = (
        header("x-slack-request-timestamp"),
        header("x-slack-signature"),
    ) else {
        return false;
    };

    let Ok(sent_at) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - sent_at).abs() > MAX_SIGNATURE_AGE_SECS {
        tracing::warn!(sent_at, now, "Rejecting stale Slack request");
        return false;
    }

    let Some(expected) = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Some(mac) = signed_mac(signing_secret, timestamp, body) else {
        return false;
    };

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "mention-bot",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /slack/events
async fn slack_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(retry) = headers.get("x-slack-retry-num") {
        tracing::info!(
            retry_num = retry.to_str().unwrap_or("?"),
            reason = headers
                .get("x-slack-retry-reason")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown"),
            "Acknowledging Slack retry without processing"
        );
        return (StatusCode::OK, [("x-slack-no-retry", "1")]).into_response();
    }

    if let Some(ref secret) = state.signing_secret {
        let now = chrono::Utc::now().timestamp();
        if !verify_slack_signature(secret, &headers, &body, now) {
            tracing::warn!("Slack request signature verification failed");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
    }

    let payload: EventsApiPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid Events API payload");
            return (StatusCode::BAD_REQUEST, "Invalid payload").into_response();
        }
    };

    if let EventsApiPayload::UrlVerification { challenge } = payload {
        tracing::info!("Events API URL verified");
        return Json(json!({ "challenge": challenge })).into_response();
    }

    let Some(mention) = payload.into_mention() else {
        return StatusCode::OK.into_response();
    };

    match state.bridge.process(mention).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slack/events", post(slack_events))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeSettings;
    use crate::test_support::{RecordingSink, ScriptedCompletion};
    use axum::body::Body;
    use axum::http::Request;
    use mention_common::history::InMemoryHistory;
    use tower::ServiceExt;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    fn test_state(
        completion: ScriptedCompletion,
        signing_secret: Option<&str>,
    ) -> (Arc<AppState>, Arc<RecordingSink>, Arc<ScriptedCompletion>) {
        let sink = Arc::new(RecordingSink::new());
        let completion = Arc::new(completion);
        let bridge = Arc::new(MentionBridge::new(
            sink.clone(),
            completion.clone(),
            Arc::new(InMemoryHistory::new()),
            BridgeSettings::default(),
        ));
        (
            AppState::new(bridge, signing_secret.map(String::from)),
            sink,
            completion,
        )
    }

    fn mention_body() -> String {
        json!({
            "type": "event_callback",
            "event_id": "Ev01",
            "event": {
                "type": "app_mention",
                "user": "U123",
                "text": "<@U0BOT> What is 2+2?",
                "ts": "1700000000.000100",
                "channel": "C1"
            }
        })
        .to_string()
    }

    fn post_events() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _, _) = test_state(ScriptedCompletion::new(&[]), None);
        let response = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_retry_is_acknowledged_without_processing() {
        let (state, sink, completion) = test_state(ScriptedCompletion::new(&["4"]), None);
        let body = mention_body();

        let response = build_router(state)
            .oneshot(
                post_events()
                    .header("x-slack-retry-num", "1")
                    .header("x-slack-retry-reason", "http_timeout")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.calls().is_empty());
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_mention_is_processed() {
        let (state, sink, _) = test_state(ScriptedCompletion::new(&["2+2 ", "is 4."]), None);
        let body = mention_body();

        let response = build_router(state)
            .oneshot(post_events().body(Body::from(body)).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.final_texts(), vec!["2+2 is 4.".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_turn_returns_500() {
        let (state, _, _) = test_state(ScriptedCompletion::failing_start(), None);
        let body = mention_body();

        let response = build_router(state)
            .oneshot(post_events().body(Body::from(body)).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_non_mention_event_is_ignored() {
        let (state, sink, _) = test_state(ScriptedCompletion::new(&["4"]), None);
        let body = json!({
            "type": "event_callback",
            "event": {"type": "reaction_added", "reaction": "thumbsup"}
        })
        .to_string();

        let response = build_router(state)
            .oneshot(post_events().body(Body::from(body)).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_returns_400() {
        let (state, _, _) = test_state(ScriptedCompletion::new(&[]), None);
        let response = build_router(state)
            .oneshot(post_events().body(Body::from("{not json")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_signature_returns_401() {
        let (state, sink, _) = test_state(ScriptedCompletion::new(&["4"]), Some(SECRET));
        let body = mention_body();

        let response = build_router(state)
            .oneshot(post_events().body(Body::from(body)).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn test_signature_verification() {
        let body = br#"{"type":"url_verification","challenge":"abc"}"#;
        let now = 1_700_000_000;
        let timestamp = now.to_string();
        let signature = compute_signature(SECRET, &timestamp, body).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-slack-request-timestamp", timestamp.parse().unwrap());
        headers.insert("x-slack-signature", signature.parse().unwrap());

        assert!(verify_slack_signature(SECRET, &headers, body, now));
        assert!(verify_slack_signature(SECRET, &headers, body, now + 299));
        assert!(!verify_slack_signature(SECRET, &headers, body, now + 301));
        assert!(!verify_slack_signature("other-secret", &headers, body, now));
        assert!(!verify_slack_signature(SECRET, &headers, b"{}", now));
    }

    #[test]
    fn test_signature_format() {
        let signature = compute_signature(SECRET, "1531420618", b"token=xyz").unwrap();
        assert!(signature.starts_with("v0="));
        assert_eq!(signature.len(), 3 + 64);
    }
}
