use crate::backend::BackendClient;
use crate::error::{BridgeError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::translate::anthropic_types::MessagesResponse;
use crate::translate::backend_types::BackendResponse;
use crate::translate::canonical::CompletionRequest;
use crate::translate::response::format_response;
use crate::translate::streaming::{anthropic_event_stream, openai_passthrough_stream, SseEvent};

use futures::stream::Stream;
use std::pin::Pin;

/// A stream of outgoing SSE frames for one response.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

/// Complete an Anthropic-style request. `requested_model` is echoed back in
/// the response instead of the backend id.
pub async fn complete_anthropic(
    backend: &BackendClient,
    req: &CompletionRequest,
    requested_model: &str,
    logger: &SharedLogger,
) -> Result<MessagesResponse> {
    logger.info(
        "proxy",
        format!("POST {} model={}", backend.endpoint(), req.model),
    );

    let value = backend.complete(req).await.map_err(|e| log_failure(logger, e))?;
    let parsed: BackendResponse = serde_json::from_value(value).map_err(|e| {
        logger.error("proxy", format!("Unparseable backend response: {e}"));
        BridgeError::from(e)
    })?;

    let resp = format_response(&parsed, requested_model);
    logger.log_with_context(
        LogLevel::Info,
        "proxy",
        "Completed",
        serde_json::json!({
            "backend_id": parsed.id,
            "input_tokens": resp.usage.input_tokens,
            "output_tokens": resp.usage.output_tokens,
            "stop_reason": resp.stop_reason,
        }),
    );
    Ok(resp)
}

/// Start an Anthropic-style streaming response. Errors before the first
/// backend byte are returned directly; later ones end the stream.
pub async fn stream_anthropic(
    backend: &BackendClient,
    req: &CompletionRequest,
    requested_model: &str,
    logger: &SharedLogger,
) -> Result<SseStream> {
    logger.info(
        "proxy",
        format!("POST {} model={} (streaming)", backend.endpoint(), req.model),
    );

    let upstream = backend
        .complete_streaming(req)
        .await
        .map_err(|e| log_failure(logger, e))?;

    Ok(Box::pin(anthropic_event_stream(
        upstream,
        requested_model.to_string(),
        logger.clone(),
    )))
}

/// Complete an OpenAI-style request. The backend's object is returned as is.
pub async fn complete_openai(
    backend: &BackendClient,
    req: &CompletionRequest,
    logger: &SharedLogger,
) -> Result<serde_json::Value> {
    logger.info(
        "proxy",
        format!("POST {} model={}", backend.endpoint(), req.model),
    );
    backend.complete(req).await.map_err(|e| log_failure(logger, e))
}

pub async fn stream_openai(
    backend: &BackendClient,
    req: &CompletionRequest,
    logger: &SharedLogger,
) -> Result<SseStream> {
    logger.info(
        "proxy",
        format!("POST {} model={} (streaming)", backend.endpoint(), req.model),
    );

    let upstream = backend
        .complete_streaming(req)
        .await
        .map_err(|e| log_failure(logger, e))?;

    Ok(Box::pin(openai_passthrough_stream(upstream, logger.clone())))
}

fn log_failure(logger: &SharedLogger, err: BridgeError) -> BridgeError {
    match &err {
        BridgeError::Backend { status, body } => logger.warn(
            "proxy",
            format!("Backend error status={status}: {}", truncate(body, 300)),
        ),
        other => logger.error("proxy", format!("Backend request failed: {other}")),
    }
    err
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        // 'é' is two bytes; cutting inside it backs off
        assert_eq!(truncate("aé", 2), "a");
    }
}
