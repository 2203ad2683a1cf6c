//! The internal conversation model both public formats are reduced to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One piece of caller-supplied content. `Unrecognized` keeps blocks of an
/// unknown type so they can still be rendered into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Image {
        media_type: String,
    },
    Unrecognized {
        raw: serde_json::Value,
    },
}

impl ContentBlock {
    /// Append this block's prompt rendering to `out`.
    pub fn render_into(&self, out: &mut String) {
        match self {
            ContentBlock::Text { text } => {
                out.push_str(text);
                out.push('\n');
            }
            ContentBlock::Image { .. } => out.push_str("[Image content not displayed]\n"),
            ContentBlock::ToolUse { id, name, input } => {
                out.push_str(&format!("[Tool: {name} (ID: {id})]\nInput: {input}\n\n"));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                out.push_str(&format!("Tool result for {tool_use_id}:\n{content}\n\n"));
            }
            ContentBlock::Unrecognized { raw } => {
                out.push_str(&raw.to_string());
                out.push('\n');
            }
        }
    }
}

/// A conversation turn after canonicalization: always a single flattened text.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Flatten a block sequence in order. Returns `None` when nothing renders.
    pub fn from_blocks(role: Role, blocks: &[ContentBlock]) -> Option<Self> {
        let mut text = String::new();
        for block in blocks {
            block.render_into(&mut text);
        }
        (!text.is_empty()).then(|| Self::new(role, text))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Tool choice as it is announced to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoiceDirective {
    Auto,
    Any,
    Tool(String),
}

impl ToolChoiceDirective {
    pub fn label(&self) -> String {
        match self {
            ToolChoiceDirective::Auto => "auto".to_string(),
            ToolChoiceDirective::Any => "any".to_string(),
            ToolChoiceDirective::Tool(name) => format!("tool {name}"),
        }
    }
}

/// Request in canonical form. At most one system message, and if present it
/// is the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}
