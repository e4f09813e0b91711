use llmhub_protocol::claude::response::MessageResponse;
use llmhub_protocol::claude::types::{ContentBlock, StopReason, Usage};
use llmhub_protocol::openai::response::{ChatChoice, ChatCompletionResponse, ChatResponseMessage};
use llmhub_protocol::openai::types::{
    ChatRole, CompletionUsage, FinishReason, FunctionCall, ToolCall, ToolCallType,
};

/// Convert a complete Claude message into a chat-completions response.
pub fn transform_response(response: MessageResponse, created: i64) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: block_text } => text.push_str(&block_text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name,
                        arguments: serde_json::Value::String(input.to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created,
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
            finish_reason: response.stop_reason.map(map_stop_reason),
        }],
        usage: Some(map_usage(response.usage)),
    }
}

pub(crate) fn map_stop_reason(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::Refusal => FinishReason::ContentFilter,
    }
}

pub(crate) fn map_usage(usage: Usage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    }
}
