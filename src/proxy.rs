use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use futures::{FutureExt, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{ProxyConfig, ResponseMode};
use crate::constants::CHAT_ROUTE;
use crate::error::ChatError;
use crate::generation::{Generation, GenerationRequest, Generator, TextStream};
use crate::Message;

pub const PLAIN_TEXT_UTF8: &str = "text/plain; charset=utf-8";

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Buffered-mode success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
}

/// Failure body shared by both response modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            ChatError::ClientInput(error) => (
                StatusCode::BAD_REQUEST,
                ErrorEnvelope {
                    error,
                    message: None,
                },
            ),
            timeout @ ChatError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorEnvelope {
                    error: "Gateway Timeout".to_string(),
                    message: Some(timeout.to_string()),
                },
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorEnvelope {
                    error: "Internal Server Error".to_string(),
                    message: Some(other.to_string()),
                },
            ),
        };
        (status, Json(envelope)).into_response()
    }
}

// Shared application state; read-only across requests
#[derive(Clone)]
struct AppState {
    config: Arc<ProxyConfig>,
    generator: Arc<dyn Generator>,
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match relay(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_client_input() {
                warn!("Rejected chat request: {}", e);
            } else {
                error!("Error in chat route: {}", e);
            }
            e.into_response()
        }
    }
}

async fn relay(state: &AppState, body: &[u8]) -> Result<Response, ChatError> {
    let request: ChatRequest = serde_json::from_slice(body)?;
    let config = &state.config;

    let system_prompt = config.resolve_system_prompt(request.system_prompt.as_deref());
    let generation_request =
        GenerationRequest::new(config.model_id.clone(), system_prompt, request.messages)?;

    info!(
        turns = generation_request.history.len(),
        mode = ?config.mode,
        "Relaying chat request"
    );

    let limit = config.max_duration;
    let deadline = Instant::now() + limit;
    let generator = state.generator.clone();

    match config.mode {
        ResponseMode::Buffered => {
            let exchange = async move {
                generator
                    .generate(generation_request, ResponseMode::Buffered)
                    .await?
                    .into_text()
                    .await
            };
            let message = tokio::time::timeout_at(deadline, exchange)
                .await
                .map_err(|_| ChatError::Timeout(limit))??;
            Ok(Json(ChatReply { message }).into_response())
        }
        ResponseMode::Streaming => {
            let generation = tokio::time::timeout_at(
                deadline,
                generator.generate(generation_request, ResponseMode::Streaming),
            )
            .await
            .map_err(|_| ChatError::Timeout(limit))??;

            let chunks: TextStream = match generation {
                Generation::Stream(stream) => stream,
                Generation::Full(text) => futures::stream::once(async move { Ok(text) }).boxed(),
            };
            Ok(plain_text_stream(chunks, deadline, limit))
        }
    }
}

/// Relays chunks as they arrive, cutting the body off at `deadline`.
fn plain_text_stream(chunks: TextStream, deadline: Instant, limit: Duration) -> Response {
    let cutoff = tokio::time::sleep_until(deadline).map(move |_| {
        warn!("Chat stream cut off at the {}s duration limit", limit.as_secs());
    });
    let body = chunks
        .take_until(cutoff)
        .map_ok(Bytes::from)
        .inspect_err(|e| error!("Chat stream failed after the response started: {}", e));

    (
        [(header::CONTENT_TYPE, PLAIN_TEXT_UTF8)],
        Body::from_stream(body),
    )
        .into_response()
}

/// Builds the proxy's router around a generation backend.
pub fn router(config: ProxyConfig, generator: Arc<dyn Generator>) -> Router {
    let state = AppState {
        config: Arc::new(config),
        generator,
    };

    Router::new()
        .route(CHAT_ROUTE, post(chat_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())) // Add request logging
}

pub async fn start_proxy_server(
    port: u16,
    config: ProxyConfig,
    generator: Arc<dyn Generator>,
) -> Result<()> {
    info!(
        model = %config.model_id,
        mode = ?config.mode,
        "Configuring chat proxy"
    );
    let app = router(config, generator);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Chat proxy listening on http://{}{}", addr, CHAT_ROUTE);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Chat proxy server failed")?;

    Ok(())
}
