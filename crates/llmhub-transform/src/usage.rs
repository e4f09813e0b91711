use llmhub_protocol::claude::stream::StreamEvent as ClaudeStreamEvent;
use llmhub_protocol::codex::stream::ResponseStreamEvent;
use llmhub_protocol::{ChatResponse, StreamEvent, TokenUsage};

use crate::geminicli;

/// Token counts surfaced by a terminal (or opening) stream event, if any.
pub fn usage_from_event(event: &StreamEvent) -> Option<TokenUsage> {
    match event {
        StreamEvent::Claude(event) => usage_from_claude_event(event),
        StreamEvent::OpenAiChat(chunk) => chunk.usage.map(|usage| TokenUsage {
            input_tokens: usage.prompt_tokens.max(0) as u64,
            output_tokens: usage.completion_tokens.max(0) as u64,
        }),
        StreamEvent::OpenAiChatDone => None,
        StreamEvent::Codex(event) => match event {
            ResponseStreamEvent::Completed { response }
            | ResponseStreamEvent::Failed { response }
            | ResponseStreamEvent::Incomplete { response } => {
                response.usage.map(|usage| TokenUsage {
                    input_tokens: usage.input_tokens.max(0) as u64,
                    output_tokens: usage.output_tokens.max(0) as u64,
                })
            }
            _ => None,
        },
        StreamEvent::GeminiCli(value) => {
            let event = geminicli::unwrap_stream_event(value.clone()).ok()?;
            usage_from_claude_event(&event)
        }
    }
}

fn usage_from_claude_event(event: &ClaudeStreamEvent) -> Option<TokenUsage> {
    match event {
        ClaudeStreamEvent::MessageStart { message } => Some(TokenUsage {
            input_tokens: message.usage.input_tokens.max(0) as u64,
            output_tokens: message.usage.output_tokens.max(0) as u64,
        }),
        ClaudeStreamEvent::MessageDelta { usage, .. } => usage.map(|usage| TokenUsage {
            input_tokens: usage.input_tokens.unwrap_or(0).max(0) as u64,
            output_tokens: usage.output_tokens.max(0) as u64,
        }),
        _ => None,
    }
}

pub fn usage_from_response(response: &ChatResponse) -> Option<TokenUsage> {
    match response {
        ChatResponse::Claude(resp) => Some(TokenUsage {
            input_tokens: resp.usage.input_tokens.max(0) as u64,
            output_tokens: resp.usage.output_tokens.max(0) as u64,
        }),
        ChatResponse::OpenAiChat(resp) => resp.usage.map(|usage| TokenUsage {
            input_tokens: usage.prompt_tokens.max(0) as u64,
            output_tokens: usage.completion_tokens.max(0) as u64,
        }),
        ChatResponse::Codex(resp) => resp.usage.map(|usage| TokenUsage {
            input_tokens: usage.input_tokens.max(0) as u64,
            output_tokens: usage.output_tokens.max(0) as u64,
        }),
        ChatResponse::GeminiCli(value) => {
            let inner = geminicli::unwrap_response(value.clone()).ok()?;
            Some(TokenUsage {
                input_tokens: inner.usage.input_tokens.max(0) as u64,
                output_tokens: inner.usage.output_tokens.max(0) as u64,
            })
        }
    }
}
