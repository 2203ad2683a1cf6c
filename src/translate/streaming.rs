//! Streaming reconstruction: backend `data:` chunks in, Anthropic lifecycle
//! events (or OpenAI passthrough records) out.
//!
//! [`StreamBridge`] is the pure state machine; [`anthropic_event_stream`] and
//! [`openai_passthrough_stream`] drive it from the backend byte stream.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::backend_types::BackendChunk;
use super::response::map_finish_reason;
use crate::error::{BridgeError, Result};
use crate::logging::SharedLogger;

const TEXT_BLOCK_INDEX: usize = 0;
const DONE_MARKER: &str = "[DONE]";

/// One outgoing server-sent event. `event` is `None` for bare `data:` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn from_event(event: &StreamEvent) -> Result<Self> {
        Ok(Self {
            event: Some(event.event_name().to_string()),
            data: serde_json::to_string(event)?,
        })
    }

    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// The `data: [DONE]` terminator.
    pub fn done() -> Self {
        Self::data(DONE_MARKER)
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == DONE_MARKER
    }
}

#[derive(Debug, Clone)]
struct ToolBlock {
    backend_index: u64,
    block_index: usize,
}

/// Per-request state of the Anthropic event reconstruction.
///
/// Block 0 is always the text block; tool calls get blocks 1..N in order of
/// first appearance. The terminal sequence is produced at most once.
#[derive(Debug)]
pub struct StreamBridge {
    model: String,
    msg_id: String,
    text_block_open: bool,
    tool_blocks: Vec<ToolBlock>,
    accumulated_text: String,
    reported_output_tokens: Option<u64>,
    terminal_sent: bool,
}

impl StreamBridge {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4()),
            text_block_open: false,
            tool_blocks: Vec::new(),
            accumulated_text: String::new(),
            reported_output_tokens: None,
            terminal_sent: false,
        }
    }

    /// `message_start`, the opening of the text block, and a `ping`.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        self.text_block_open = true;
        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.msg_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Translate one backend chunk into zero or more events.
    pub fn process_chunk(&mut self, chunk: &BackendChunk) -> Vec<StreamEvent> {
        if self.terminal_sent {
            return Vec::new();
        }

        if let Some(ref usage) = chunk.usage {
            if usage.completion_tokens > 0 {
                self.reported_output_tokens = Some(usage.completion_tokens);
            }
        }

        let Some(choice) = chunk.choices.first() else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            self.accumulated_text.push_str(text);
            events.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        for tc in choice.delta.tool_calls.iter().flatten() {
            let block_index = match self
                .tool_blocks
                .iter()
                .find(|b| b.backend_index == tc.index)
            {
                Some(block) => block.block_index,
                None => {
                    let block_index = self.tool_blocks.len() + 1;
                    self.tool_blocks.push(ToolBlock {
                        backend_index: tc.index,
                        block_index,
                    });
                    events.push(StreamEvent::ContentBlockStart {
                        index: block_index,
                        content_block: ResponseContentBlock::ToolUse {
                            id: tc.id.clone().unwrap_or_default(),
                            name: tc
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default(),
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });
                    block_index
                }
            };

            if let Some(args) = tc
                .function
                .as_ref()
                .and_then(|f| f.arguments.as_deref())
                .filter(|a| !a.is_empty())
            {
                events.push(StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: Delta::InputJsonDelta {
                        partial_json: args.to_string(),
                    },
                });
            }
        }

        if let Some(reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            events.extend(self.finish(Some(reason)));
        }

        events
    }

    /// Close all blocks and end the message. `None` means the backend stream
    /// ended without a finish reason. Returns nothing once already finished.
    pub fn finish(&mut self, reason: Option<&str>) -> Vec<StreamEvent> {
        if self.terminal_sent {
            return Vec::new();
        }
        self.terminal_sent = true;

        let mut events: Vec<StreamEvent> = self
            .tool_blocks
            .iter()
            .map(|b| StreamEvent::ContentBlockStop {
                index: b.block_index,
            })
            .collect();

        if self.text_block_open {
            events.push(StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
            self.text_block_open = false;
        }

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(map_finish_reason(reason.unwrap_or_default()).to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens(),
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }

    pub fn is_finished(&self) -> bool {
        self.terminal_sent
    }

    /// The backend's reported count when it sent one, otherwise a character
    /// estimate of the text streamed so far.
    pub fn output_tokens(&self) -> u64 {
        self.reported_output_tokens
            .unwrap_or_else(|| (self.accumulated_text.chars().count() / 4) as u64)
    }
}

/// Splits a byte stream into lines. Bytes are buffered until a full line is
/// present, so multi-byte characters split across reads decode correctly.
#[derive(Debug, Default)]
struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&rest).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

enum Record<'a> {
    Data(&'a str),
    Done,
    Skip,
}

fn classify(line: &str) -> Record<'_> {
    match line.strip_prefix("data:").map(str::trim) {
        Some(DONE_MARKER) => Record::Done,
        Some(data) if !data.is_empty() => Record::Data(data),
        _ => Record::Skip,
    }
}

/// Lines of an upstream byte stream, including a final unterminated line.
fn sse_lines<S, E>(upstream: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut decoder = LineDecoder::default();
        futures::pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            let chunk = chunk.map_err(|e| BridgeError::stream_read(e.to_string()))?;
            for line in decoder.push(&chunk) {
                yield line;
            }
        }

        if let Some(line) = decoder.finish() {
            yield line;
        }
    }
}

/// Drive a [`StreamBridge`] from the backend byte stream.
///
/// The start events are sent before anything is read. The stream ends after
/// the terminal sequence and `data: [DONE]`, or with an error if reading from
/// the backend fails (in which case no terminal sequence is produced).
pub fn anthropic_event_stream<S, E>(
    upstream: S,
    model: String,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let mut bridge = StreamBridge::new(&model);
        for event in bridge.start() {
            yield SseEvent::from_event(&event)?;
        }

        let lines = sse_lines(upstream);
        futures::pin_mut!(lines);

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| {
                logger.error("stream", format!("Backend stream failed: {e}"));
                e
            })?;

            let events = match classify(&line) {
                Record::Skip => continue,
                Record::Done => break,
                Record::Data(data) => match serde_json::from_str::<BackendChunk>(data) {
                    Ok(chunk) => bridge.process_chunk(&chunk),
                    Err(e) => {
                        logger.debug("stream", format!("Skipping unparseable chunk: {e}"));
                        continue;
                    }
                },
            };

            for event in events {
                yield SseEvent::from_event(&event)?;
            }

            if bridge.is_finished() {
                break;
            }
        }

        for event in bridge.finish(None) {
            yield SseEvent::from_event(&event)?;
        }
        yield SseEvent::done();

        logger.info(
            "stream",
            format!("Stream completed, output_tokens={}", bridge.output_tokens()),
        );
    }
}

/// Re-emit backend chunks unchanged for OpenAI-style callers. Chunks without
/// choices and unparseable chunks are dropped; the stream always ends with
/// `data: [DONE]` unless reading from the backend fails.
pub fn openai_passthrough_stream<S, E>(
    upstream: S,
    logger: SharedLogger,
) -> impl Stream<Item = Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let lines = sse_lines(upstream);
        futures::pin_mut!(lines);
        let mut forwarded = 0usize;

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| {
                logger.error("stream", format!("Backend stream failed: {e}"));
                e
            })?;

            match classify(&line) {
                Record::Skip => {}
                Record::Done => break,
                Record::Data(data) => match serde_json::from_str::<BackendChunk>(data) {
                    Ok(chunk) if !chunk.choices.is_empty() => {
                        forwarded += 1;
                        yield SseEvent::data(data);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logger.debug("stream", format!("Skipping unparseable chunk: {e}"));
                    }
                },
            }
        }

        yield SseEvent::done();
        logger.info("stream", format!("Passthrough completed, chunks={forwarded}"));
    }
}
