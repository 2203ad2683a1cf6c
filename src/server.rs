use crate::backend::BackendClient;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::logging::{request_summary, LogEntry, SharedLogger};
use crate::models::ModelResolver;
use crate::proxy::{self, SseStream};
use crate::translate::anthropic_types::{
    CountTokensRequest, CountTokensResponse, ErrorResponse, MessagesRequest,
};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse, ModelEntry, ModelList};
use crate::translate::request::{
    anthropic_messages, canonicalize_anthropic, canonicalize_openai, estimate_tokens,
};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::io::IsTerminal;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: BridgeConfig,
    pub models: ModelResolver,
    pub backend: BackendClient,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let anthropic = Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_anthropic_health));

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/logs", get(handle_logs))
        .nest("/anthropic", anthropic)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Failed to parse request: {e}"));
            return openai_error(&BridgeError::invalid_request(format!("Invalid request body: {e}")));
        }
    };

    let canonical = match canonicalize_openai(&req, &state.models) {
        Ok(c) => c,
        Err(e) => {
            state.logger.warn("server", format!("Rejected request: {e}"));
            return openai_error(&e);
        }
    };

    let is_streaming = req.stream.unwrap_or(false);
    let num_tools = req
        .extra
        .get("tools")
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len);

    state.logger.info(
        "server",
        format!(
            "Chat request: model={} backend={} streaming={} messages={}",
            req.model,
            canonical.model,
            is_streaming,
            canonical.messages.len()
        ),
    );

    let response = if is_streaming {
        match proxy::stream_openai(&state.backend, &canonical, &state.logger).await {
            Ok(stream) => sse_response(stream),
            Err(e) => openai_error(&e),
        }
    } else {
        match proxy::complete_openai(&state.backend, &canonical, &state.logger).await {
            Ok(value) => Json(value).into_response(),
            Err(e) => openai_error(&e),
        }
    };

    print_summary(
        &state,
        "/v1/chat/completions",
        &req.model,
        &canonical.model,
        canonical.messages.len(),
        num_tools,
        response.status(),
    );
    response
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Failed to parse request: {e}"));
            return anthropic_error(&BridgeError::invalid_request(format!(
                "Invalid request body: {e}"
            )));
        }
    };

    let canonical = match canonicalize_anthropic(&req, &state.models) {
        Ok(c) => c,
        Err(e) => {
            state.logger.warn("server", format!("Rejected request: {e}"));
            return anthropic_error(&e);
        }
    };

    let num_tools = req.tools.as_ref().map_or(0, Vec::len);
    state.logger.info(
        "server",
        format!(
            "Messages request: model={} backend={} streaming={} messages={} tools={}",
            req.model,
            canonical.model,
            canonical.stream,
            canonical.messages.len(),
            num_tools
        ),
    );

    let response = if canonical.stream {
        match proxy::stream_anthropic(&state.backend, &canonical, &req.model, &state.logger).await
        {
            Ok(stream) => sse_response(stream),
            Err(e) => anthropic_error(&e),
        }
    } else {
        match proxy::complete_anthropic(&state.backend, &canonical, &req.model, &state.logger)
            .await
        {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => anthropic_error(&e),
        }
    };

    print_summary(
        &state,
        "/anthropic/v1/messages",
        &req.model,
        &canonical.model,
        canonical.messages.len(),
        num_tools,
        response.status(),
    );
    response
}

/// Local estimate only: the model name is not resolved and the backend is not called.
async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return anthropic_error(&BridgeError::invalid_request(format!(
                "Invalid request body: {e}"
            )));
        }
    };

    match anthropic_messages(&req) {
        Ok(messages) => {
            let input_tokens = estimate_tokens(&messages);
            state
                .logger
                .debug("server", format!("count_tokens model={} tokens={input_tokens}", req.model));
            Json(CountTokensResponse { input_tokens }).into_response()
        }
        Err(e) => anthropic_error(&e),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Service is healthy",
    }))
}

async fn handle_anthropic_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Anthropic API proxy is healthy",
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    let data = state
        .models
        .aliases()
        .iter()
        .map(|alias| ModelEntry {
            id: alias.id.clone(),
            object: "model".to_string(),
            owned_by: alias.provider.clone(),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}

const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, serde::Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// Recent request-log entries, newest first. Tokens are already masked.
async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(state.logger.recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

/// Frames are written as they are pulled; an `Err` item ends the body.
fn sse_response(stream: SseStream) -> Response {
    let events = stream.map(|item| {
        item.map(|sse| {
            let event = Event::default().data(sse.data);
            match sse.event {
                Some(name) => event.event(name),
                None => event,
            }
        })
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn status_of(err: &BridgeError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn anthropic_error(err: &BridgeError) -> Response {
    let status = status_of(err);
    let body = if err.is_client_error() {
        ErrorResponse::invalid_request(err.to_string())
    } else {
        ErrorResponse::for_status(status.as_u16(), err.to_string())
    };
    (status, Json(body)).into_response()
}

fn openai_error(err: &BridgeError) -> Response {
    let status = status_of(err);
    let body = match err {
        BridgeError::UnknownModel { .. } => ChatErrorResponse::model_not_found(err.to_string()),
        e if e.is_client_error() => ChatErrorResponse::invalid_request(err.to_string()),
        _ => ChatErrorResponse::for_status(status.as_u16(), err.to_string()),
    };
    (status, Json(body)).into_response()
}

#[allow(clippy::too_many_arguments)]
fn print_summary(
    state: &AppState,
    path: &str,
    requested_model: &str,
    backend_model: &str,
    num_messages: usize,
    num_tools: usize,
    status: StatusCode,
) {
    if !state.config.debug {
        return;
    }
    let colour = std::io::stdout().is_terminal();
    println!(
        "{}",
        request_summary(
            "POST",
            path,
            requested_model,
            backend_model,
            num_messages,
            num_tools,
            status.as_u16(),
            colour,
        )
    );
}
