use serde_json::Value as JsonValue;

use llmhub_protocol::codex::response::ResponseBody;
use llmhub_protocol::codex::types::{OutputContent, OutputItem, ResponseUsage};
use llmhub_protocol::openai::response::{ChatChoice, ChatCompletionResponse, ChatResponseMessage};
use llmhub_protocol::openai::types::{
    ChatRole, CompletionUsage, FinishReason, FunctionCall, ToolCall, ToolCallType,
};

/// Convert a complete Response API body into a chat-completions response.
pub fn transform_response(response: ResponseBody) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for item in response.output {
        match item {
            OutputItem::Message { content, .. } => {
                for part in content {
                    if let OutputContent::OutputText { text: part_text } = part {
                        text.push_str(&part_text);
                    }
                }
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                tool_calls.push(ToolCall {
                    id: call_id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name,
                        arguments: normalize_arguments(arguments),
                    },
                });
            }
            OutputItem::Unknown => {}
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        FinishReason::ToolCalls
    } else if response.status.as_deref() == Some("incomplete") {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: response.created_at,
        model: response.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatResponseMessage {
                role: ChatRole::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason),
        }],
        usage: response.usage.map(map_usage),
    }
}

/// Chat-completions clients expect `arguments` as a JSON-encoded string.
pub(crate) fn normalize_arguments(arguments: JsonValue) -> JsonValue {
    match arguments {
        JsonValue::String(text) => JsonValue::String(text),
        other => JsonValue::String(other.to_string()),
    }
}

pub(crate) fn map_usage(usage: ResponseUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.input_tokens + usage.output_tokens
        },
    }
}
