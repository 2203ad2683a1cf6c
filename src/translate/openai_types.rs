//! Inbound types for the OpenAI-style chat completions endpoint.
//!
//! Only what the bridge reads is modelled; the completion object itself is
//! passed back to the caller as the backend produced it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<InboundPart>),
    Unsupported(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundPart {
    Known(ContentPart),
    Raw(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlDetail },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlDetail {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ImageUrlDetail {
    /// Media type of a `data:` URL, if it is one.
    pub fn media_type(&self) -> Option<&str> {
        self.url
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .filter(|m| !m.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatErrorResponse {
    pub error: ChatError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatError {
    pub message: String,
    #[serde(rename = "type")]
    #[serde(default)]
    pub error_type: String,
    pub code: Option<String>,
}

impl ChatErrorResponse {
    pub fn new(message: impl Into<String>, error_type: &str, code: Option<&str>) -> Self {
        Self {
            error: ChatError {
                message: message.into(),
                error_type: error_type.to_string(),
                code: code.map(str::to_string),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error", None)
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(message, "invalid_request_error", Some("model_not_found"))
    }

    pub fn for_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            400..=499 => Self::new(message, "invalid_request_error", None),
            _ => Self::new(message, "server_error", None),
        }
    }
}
