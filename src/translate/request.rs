//! Reduce either public request format to a [`CompletionRequest`].
//!
//! Every turn is flattened into a single text, the system prompt and tool
//! catalogue are merged into one leading system message, and the model name is
//! resolved. All functions here are pure.

use serde_json::Value;

use super::anthropic_types::{
    self, InboundBlock, MessageContent, MessagesRequest, SystemContent, ToolChoice,
};
use super::canonical::{
    CompletionRequest, ContentBlock, Message, Role, ToolChoiceDirective, ToolDefinition,
};
use super::openai_types::{ChatCompletionRequest, ChatContent, ChatRole, ContentPart, InboundPart};
use crate::error::{BridgeError, Result};
use crate::models::{Dialect, ModelResolver};

const PER_MESSAGE_OVERHEAD_CHARS: usize = 40;
const CHARS_PER_TOKEN: usize = 4;

/// Canonicalize an Anthropic-style request, resolving its model name.
pub fn canonicalize_anthropic(
    req: &MessagesRequest,
    resolver: &ModelResolver,
) -> Result<CompletionRequest> {
    let model = resolver.resolve(&req.model, Dialect::Anthropic)?;
    Ok(CompletionRequest {
        model,
        messages: anthropic_messages(req)?,
        stream: req.stream.unwrap_or(false),
        max_tokens: req.max_tokens,
    })
}

/// The canonical message sequence of an Anthropic-style request.
pub fn anthropic_messages(req: &MessagesRequest) -> Result<Vec<Message>> {
    let system = req
        .system
        .as_ref()
        .map(SystemContent::as_text)
        .filter(|s| !s.is_empty());

    let catalogue = req.tools.as_deref().filter(|t| !t.is_empty()).map(|tools| {
        let definitions: Vec<ToolDefinition> = tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();
        let directive = req.tool_choice.as_ref().and_then(tool_choice_directive);
        render_tool_catalogue(&definitions, directive.as_ref())
    });

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = merge_system(system, catalogue) {
        messages.push(Message::new(Role::System, system));
    }

    for msg in &req.messages {
        let role = match msg.role {
            anthropic_types::Role::User => Role::User,
            anthropic_types::Role::Assistant => Role::Assistant,
        };
        match &msg.content {
            MessageContent::Text(text) => messages.push(Message::new(role, text.clone())),
            MessageContent::Blocks(blocks) => {
                let blocks: Vec<ContentBlock> = blocks.iter().map(anthropic_block).collect();
                if let Some(message) = Message::from_blocks(role, &blocks) {
                    messages.push(message);
                }
            }
            MessageContent::Unsupported(_) => {
                return Err(BridgeError::UnsupportedContentShape {
                    role: role.as_str().to_string(),
                });
            }
        }
    }

    Ok(messages)
}

/// Canonicalize an OpenAI-style request. System messages anywhere in the
/// conversation are merged, in order, into the leading system message.
pub fn canonicalize_openai(
    req: &ChatCompletionRequest,
    resolver: &ModelResolver,
) -> Result<CompletionRequest> {
    let model = resolver.resolve(&req.model, Dialect::OpenAi)?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut turns: Vec<Message> = Vec::with_capacity(req.messages.len());

    for msg in &req.messages {
        let role = match msg.role {
            ChatRole::System => Role::System,
            ChatRole::User => Role::User,
            ChatRole::Assistant => Role::Assistant,
        };

        let message = match &msg.content {
            None => None,
            Some(ChatContent::Text(text)) => Some(Message::new(role, text.clone())),
            Some(ChatContent::Parts(parts)) => {
                let blocks: Vec<ContentBlock> = parts.iter().map(openai_part).collect();
                Message::from_blocks(role, &blocks)
            }
            Some(ChatContent::Unsupported(_)) => {
                return Err(BridgeError::UnsupportedContentShape {
                    role: role.as_str().to_string(),
                });
            }
        };

        match message {
            Some(m) if m.role == Role::System => {
                if !m.content.is_empty() {
                    system_parts.push(m.content);
                }
            }
            Some(m) => turns.push(m),
            None => {}
        }
    }

    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system_parts.is_empty() {
        messages.push(Message::new(Role::System, system_parts.join("\n\n")));
    }
    messages.extend(turns);

    Ok(CompletionRequest {
        model,
        messages,
        stream: req.stream.unwrap_or(false),
        max_tokens: req.max_tokens,
    })
}

fn merge_system(system: Option<String>, catalogue: Option<String>) -> Option<String> {
    match (system, catalogue) {
        (Some(system), Some(catalogue)) => Some(format!("{system}\n\n{catalogue}")),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

fn tool_choice_directive(choice: &ToolChoice) -> Option<ToolChoiceDirective> {
    match choice.choice_type.as_str() {
        "auto" => Some(ToolChoiceDirective::Auto),
        "any" => Some(ToolChoiceDirective::Any),
        "tool" => choice.name.clone().map(ToolChoiceDirective::Tool),
        _ => None,
    }
}

fn anthropic_block(block: &InboundBlock) -> ContentBlock {
    match block {
        InboundBlock::Known(anthropic_types::ContentBlock::Text { text }) => {
            ContentBlock::Text { text: text.clone() }
        }
        InboundBlock::Known(anthropic_types::ContentBlock::Image { source }) => {
            ContentBlock::Image {
                media_type: source.media_type.clone(),
            }
        }
        InboundBlock::Known(anthropic_types::ContentBlock::ToolUse { id, name, input }) => {
            ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }
        }
        InboundBlock::Known(anthropic_types::ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        }) => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: render_tool_result_content(content.as_ref()),
        },
        InboundBlock::Raw(raw) => ContentBlock::Unrecognized { raw: raw.clone() },
    }
}

fn openai_part(part: &InboundPart) -> ContentBlock {
    match part {
        InboundPart::Known(ContentPart::Text { text }) => ContentBlock::Text { text: text.clone() },
        InboundPart::Known(ContentPart::ImageUrl { image_url }) => ContentBlock::Image {
            media_type: image_url.media_type().unwrap_or_default().to_string(),
        },
        InboundPart::Raw(raw) => ContentBlock::Unrecognized { raw: raw.clone() },
    }
}

/// Render the content of a `tool_result` block as plain text.
pub fn render_tool_result_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => "No content provided".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => {
            let mut out = String::new();
            for item in items {
                match item {
                    Value::String(text) => out.push_str(text),
                    Value::Object(map) => match map.get("text").and_then(Value::as_str) {
                        Some(text) => out.push_str(text),
                        None => out.push_str(&item.to_string()),
                    },
                    other => out.push_str(&other.to_string()),
                }
                out.push('\n');
            }
            out.trim().to_string()
        }
        Some(object) if object.is_object() => object
            .get("text")
            .and_then(Value::as_str)
            .map_or_else(|| object.to_string(), str::to_string),
        Some(other) => other.to_string(),
    }
}

/// The tool catalogue appended to the system prompt.
pub fn render_tool_catalogue(
    tools: &[ToolDefinition],
    choice: Option<&ToolChoiceDirective>,
) -> String {
    let mut out = String::from("Available Tools:\n");
    for tool in tools {
        let description = tool
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
            .map_or_else(|| format!("Tool for {} operations", tool.name), str::to_string);
        out.push_str(&format!(
            "- {}: {}\nInput Schema: {}\n\n",
            tool.name, description, tool.input_schema
        ));
    }
    if let Some(choice) = choice {
        out.push_str(&format!("Tool Choice: {}\n", choice.label()));
    }
    out
}

/// Rough input token count: characters plus a per-message overhead, four
/// characters per token, never less than one.
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    let chars: usize = messages
        .iter()
        .map(|m| m.content.chars().count() + PER_MESSAGE_OVERHEAD_CHARS)
        .sum();
    ((chars / CHARS_PER_TOKEN) as u64).max(1)
}
