use llmhub_protocol::claude::response::MessageResponse;
use llmhub_protocol::claude::types::{ContentBlock, MessageRole, StopReason, Usage};
use llmhub_protocol::openai::response::ChatCompletionResponse;
use llmhub_protocol::openai::types::{CompletionUsage, FinishReason};

use super::request::parse_arguments;

/// Convert a complete chat-completions response into a Claude message.
pub fn transform_response(response: ChatCompletionResponse) -> MessageResponse {
    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content
            && !text.is_empty()
        {
            content.push(ContentBlock::Text { text });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(call.function.arguments),
            });
        }
        stop_reason = choice.finish_reason.map(map_finish_reason);
    }

    MessageResponse {
        id: response.id,
        r#type: "message".to_string(),
        role: MessageRole::Assistant,
        content,
        model: response.model,
        stop_reason,
        stop_sequence: None,
        usage: response.usage.map(map_usage).unwrap_or_default(),
    }
}

pub(crate) fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::Refusal,
    }
}

pub(crate) fn map_usage(usage: CompletionUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}
