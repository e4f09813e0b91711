use serde_json::Value as JsonValue;

use llmhub_protocol::claude::request::CreateMessageRequest;
use llmhub_protocol::claude::types::{
    ContentBlock, MessageContent, MessageRole, ToolChoice as ClaudeToolChoice, ToolResultContent,
};
use llmhub_protocol::openai::request::CreateChatCompletionRequest;
use llmhub_protocol::openai::types::{
    ChatContent, ChatContentPart, ChatMessage, ChatRole, FunctionCall, FunctionDefinition,
    ImageUrl, NamedToolChoice, ToolCall, ToolCallType, ToolChoice, ToolChoiceFunction,
    ToolDefinition,
};

/// Convert a Claude messages request into an OpenAI chat-completions
/// request. The `system` prompt becomes a leading system message; tool_use
/// and tool_result blocks become `tool_calls` and `tool` messages.
pub fn transform_request(request: CreateMessageRequest) -> CreateChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        let text = system.joined_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text(ChatRole::System, text));
        }
    }

    for message in request.messages {
        match message.content {
            MessageContent::Text(text) => {
                messages.push(ChatMessage::text(map_role(message.role), text));
            }
            MessageContent::Blocks(blocks) => {
                map_blocks(map_role(message.role), blocks, &mut messages);
            }
        }
    }

    CreateChatCompletionRequest {
        model: request.model,
        messages,
        stream: request.stream,
        max_tokens: request.max_tokens,
        max_completion_tokens: None,
        max_output_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request
            .stop_sequences
            .map(|stops| JsonValue::Array(stops.into_iter().map(JsonValue::String).collect())),
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ToolDefinition {
                    r#type: ToolCallType::Function,
                    function: FunctionDefinition {
                        name: tool.name,
                        description: tool.description,
                        parameters: Some(tool.input_schema),
                        strict: None,
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.map(map_tool_choice),
        parallel_tool_calls: None,
        store: None,
        user: request.metadata.and_then(|metadata| metadata.user_id),
        session_id: None,
        extra: serde_json::Map::new(),
    }
}

fn map_role(role: MessageRole) -> ChatRole {
    match role {
        MessageRole::User => ChatRole::User,
        MessageRole::Assistant => ChatRole::Assistant,
    }
}

fn map_blocks(role: ChatRole, blocks: Vec<ContentBlock>, messages: &mut Vec<ChatMessage>) {
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ChatContentPart::Text { text }),
            ContentBlock::Image { source } => {
                let url = match (source.url, source.data) {
                    (Some(url), _) => url,
                    (None, Some(data)) => format!(
                        "data:{};base64,{}",
                        source.media_type.as_deref().unwrap_or("image/png"),
                        data
                    ),
                    (None, None) => continue,
                };
                parts.push(ChatContentPart::ImageUrl {
                    image_url: ImageUrl { url, detail: None },
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name,
                        arguments: input,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(ChatContent::Text(tool_result_text(content))),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
            // Thinking has no chat-completions counterpart.
            ContentBlock::Thinking { .. } | ContentBlock::Unknown => {}
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return;
    }

    let content = match parts.len() {
        0 => None,
        1 => match parts.pop() {
            Some(ChatContentPart::Text { text }) => Some(ChatContent::Text(text)),
            Some(part) => Some(ChatContent::Parts(vec![part])),
            None => None,
        },
        _ => Some(ChatContent::Parts(parts)),
    };

    messages.push(ChatMessage {
        role,
        content,
        name: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    });
}

fn tool_result_text(content: Option<ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text,
        Some(ToolResultContent::Blocks(blocks)) => {
            let texts: Vec<String> = blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect();
            texts.join("\n")
        }
        None => String::new(),
    }
}

fn map_tool_choice(choice: ClaudeToolChoice) -> ToolChoice {
    match choice {
        ClaudeToolChoice::Auto => ToolChoice::Mode("auto".to_string()),
        ClaudeToolChoice::Any => ToolChoice::Mode("required".to_string()),
        ClaudeToolChoice::None => ToolChoice::Mode("none".to_string()),
        ClaudeToolChoice::Tool { name } => ToolChoice::Named(NamedToolChoice {
            r#type: ToolCallType::Function,
            function: ToolChoiceFunction { name },
        }),
    }
}
