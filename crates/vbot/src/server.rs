//! HTTP server for the Slack and Travis CI webhooks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{warn, Level};

use crate::actions::ActionInvoker;
use crate::chat::ChatRouter;
use crate::ci::CiRouter;
use crate::config::Config;
use crate::envelope::ResponseEnvelope;
use crate::keys::PublicKeySource;
use crate::request::InboundRequest;
use crate::secrets::SecretProvider;

/// Header a scheduler sets on warm-up pings.
pub const EVENT_SOURCE_HEADER: &str = "detail-type";

/// Slack and Travis bodies are small form posts.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Slack slash-command router.
    pub chat: Arc<ChatRouter>,
    /// Travis CI webhook router.
    pub ci: Arc<CiRouter>,
}

impl AppState {
    /// Wire both routers from configuration and shared collaborators.
    #[must_use]
    pub fn new(
        config: &Config,
        secrets: Arc<dyn SecretProvider>,
        keys: Arc<dyn PublicKeySource>,
        actions: Arc<dyn ActionInvoker>,
    ) -> Self {
        let chat = ChatRouter::new(config.chat.clone(), secrets, Arc::clone(&actions));
        let ci = CiRouter::new(
            config.ci.build_filter.clone(),
            config.ci.default_provider,
            keys,
            actions,
        );
        Self {
            chat: Arc::new(chat),
            ci: Arc::new(ci),
        }
    }

    /// Wait for deploys that were acknowledged before their completion.
    pub async fn wait_for_deploys(&self) {
        self.chat.wait_for_deploys().await;
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/slack", post(slack_handler))
        .route("/travis", post(travis_handler))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn slack_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = inbound_request(&headers, &body);
    envelope_response(state.chat.handle(&request).await)
}

async fn travis_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = inbound_request(&headers, &body);
    envelope_response(state.ci.handle(&request).await)
}

/// Convert an HTTP request into the transport-neutral envelope.
///
/// Headers that are not valid UTF-8 are dropped. The `detail-type` header,
/// when present, becomes the event marker.
#[must_use]
pub fn inbound_request(headers: &HeaderMap, body: &[u8]) -> InboundRequest {
    let mut map = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => {
                map.entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
            Err(_) => warn!(header = %name, "Dropping non UTF-8 header value"),
        }
    }

    let event_source = map.get(EVENT_SOURCE_HEADER).cloned();

    InboundRequest {
        headers: map,
        body: String::from_utf8_lossy(body).into_owned(),
        event_source,
    }
}

/// Map an envelope onto an HTTP response. No envelope means `204 No Content`.
#[must_use]
pub fn envelope_response(envelope: Option<ResponseEnvelope>) -> Response {
    let Some(envelope) = envelope else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let status = envelope
        .status_code
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::BAD_REQUEST);

    let mut response = (status, envelope.body).into_response();
    for (name, value) in &envelope.headers {
        let Ok(name) = header::HeaderName::try_from(name.as_str()) else {
            continue;
        };
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
