use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::backend_types::BackendResponse;

/// Convert a complete backend response into an Anthropic Messages response.
/// `model` is the name the caller sent, not the backend id.
pub fn format_response(resp: &BackendResponse, model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        for tc in c.message.tool_calls.iter().flatten() {
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    let stop_reason = map_finish_reason(
        choice
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or_default(),
    );

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4()),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Map a backend finish reason to an Anthropic stop reason.
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::backend_types::*;

    fn make_response(content: Option<&str>, finish_reason: Option<&str>) -> BackendResponse {
        BackendResponse {
            id: "chatcmpl-abc123".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: content.map(String::from),
                    tool_calls: None,
                },
                finish_reason: finish_reason.map(String::from),
            }],
            usage: Some(BackendUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
            }),
        }
    }

    #[test]
    fn test_text_response() {
        let resp = make_response(Some("Hello!"), Some("stop"));
        let result = format_response(&resp, "claude-3-5-sonnet");

        assert!(result.id.starts_with("msg_"));
        assert_eq!(result.response_type, "message");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "claude-3-5-sonnet");
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::Text {
                text: "Hello!".to_string()
            }]
        );
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_empty_content_is_omitted() {
        let result = format_response(&make_response(Some(""), Some("length")), "m");
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason.as_deref(), Some("max_tokens"));
    }

    #[test]
    fn test_no_choices() {
        let resp = BackendResponse::default();
        let result = format_response(&resp, "m");
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(result.usage.output_tokens, 0);
    }

    #[test]
    fn test_tool_calls_become_tool_use_blocks() {
        let mut resp = make_response(Some("Checking"), Some("tool_calls"));
        resp.choices[0].message.tool_calls = Some(vec![ToolCall {
            id: "call_1".to_string(),
            function: ToolCallFunction {
                name: "search".to_string(),
                arguments: r#"{"q":"rust"}"#.to_string(),
            },
        }]);

        let result = format_response(&resp, "m");
        assert_eq!(result.content.len(), 2);
        assert_eq!(
            result.content[1],
            ResponseContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({"q": "rust"}),
            }
        );
        assert_eq!(result.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), "end_turn");
        assert_eq!(map_finish_reason("length"), "max_tokens");
        assert_eq!(map_finish_reason("tool_calls"), "tool_use");
        assert_eq!(map_finish_reason("content_filter"), "end_turn");
        assert_eq!(map_finish_reason(""), "end_turn");
    }
}
