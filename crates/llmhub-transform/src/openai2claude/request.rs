use serde_json::Value as JsonValue;

use llmhub_protocol::claude::request::CreateMessageRequest;
use llmhub_protocol::claude::types::{
    ContentBlock, ImageSource, MessageContent, MessageParam, MessageRole, RequestMetadata,
    SystemPrompt, ToolChoice as ClaudeToolChoice, ToolDefinition as ClaudeToolDefinition,
    ToolResultContent,
};
use llmhub_protocol::openai::request::CreateChatCompletionRequest;
use llmhub_protocol::openai::types::{ChatContent, ChatContentPart, ChatRole, ToolChoice};

/// Messages upstream rejects bodies without `max_tokens`; used when the
/// chat request carried no length limit at all.
const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Convert an OpenAI chat-completions request into a Claude messages
/// request. System/developer messages fold into the `system` prompt;
/// `tool_calls` become tool_use blocks and tool messages become tool_result
/// blocks on a user turn.
pub fn transform_request(request: CreateChatCompletionRequest) -> CreateMessageRequest {
    let mut system_texts = Vec::new();
    let mut messages: Vec<MessageParam> = Vec::new();

    for message in request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(text) = message.content_text()
                    && !text.is_empty()
                {
                    system_texts.push(text);
                }
            }
            ChatRole::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message
                        .content_text()
                        .map(ToolResultContent::Text),
                    is_error: None,
                };
                push_block(&mut messages, MessageRole::User, block);
            }
            ChatRole::User => {
                for block in map_content_blocks(message.content) {
                    push_block(&mut messages, MessageRole::User, block);
                }
            }
            ChatRole::Assistant => {
                for block in map_content_blocks(message.content) {
                    push_block(&mut messages, MessageRole::Assistant, block);
                }
                for call in message.tool_calls.unwrap_or_default() {
                    let block = ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: parse_arguments(call.function.arguments),
                    };
                    push_block(&mut messages, MessageRole::Assistant, block);
                }
            }
        }
    }

    let system = if system_texts.is_empty() {
        None
    } else {
        Some(SystemPrompt::Text(system_texts.join("\n\n")))
    };

    CreateMessageRequest {
        model: request.model,
        messages,
        system,
        max_tokens: request
            .max_tokens
            .or(request.max_completion_tokens)
            .or(request.max_output_tokens)
            .or(Some(DEFAULT_MAX_TOKENS)),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: map_stop(request.stop),
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ClaudeToolDefinition {
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool
                        .function
                        .parameters
                        .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new())),
                })
                .collect()
        }),
        tool_choice: request.tool_choice.map(map_tool_choice),
        metadata: request.user.map(|user| RequestMetadata {
            user_id: Some(user),
        }),
        extra: serde_json::Map::new(),
    }
}

/// Append a block, merging into the previous message when the role repeats
/// so the outbound conversation stays strictly alternating.
fn push_block(messages: &mut Vec<MessageParam>, role: MessageRole, block: ContentBlock) {
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        match &mut last.content {
            MessageContent::Blocks(blocks) => blocks.push(block),
            MessageContent::Text(text) => {
                let mut blocks = vec![ContentBlock::Text {
                    text: std::mem::take(text),
                }];
                blocks.push(block);
                last.content = MessageContent::Blocks(blocks);
            }
        }
        return;
    }
    messages.push(MessageParam {
        role,
        content: MessageContent::Blocks(vec![block]),
    });
}

fn map_content_blocks(content: Option<ChatContent>) -> Vec<ContentBlock> {
    match content {
        Some(ChatContent::Text(text)) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentBlock::Text { text }]
            }
        }
        Some(ChatContent::Parts(parts)) => parts
            .into_iter()
            .filter_map(|part| match part {
                ChatContentPart::Text { text } => Some(ContentBlock::Text { text }),
                ChatContentPart::ImageUrl { image_url } => Some(ContentBlock::Image {
                    source: ImageSource::url(image_url.url),
                }),
                ChatContentPart::Unknown => None,
            })
            .collect(),
        None => Vec::new(),
    }
}

/// tool_use input must be an object; a string form is parsed when possible.
pub(crate) fn parse_arguments(arguments: JsonValue) -> JsonValue {
    match arguments {
        JsonValue::String(text) => {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        }
        other => other,
    }
}

fn map_stop(stop: Option<JsonValue>) -> Option<Vec<String>> {
    match stop? {
        JsonValue::String(stop) => Some(vec![stop]),
        JsonValue::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::String(stop) => Some(stop),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn map_tool_choice(choice: ToolChoice) -> ClaudeToolChoice {
    match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "none" => ClaudeToolChoice::None,
            "required" => ClaudeToolChoice::Any,
            _ => ClaudeToolChoice::Auto,
        },
        ToolChoice::Named(named) => ClaudeToolChoice::Tool {
            name: named.function.name,
        },
    }
}
