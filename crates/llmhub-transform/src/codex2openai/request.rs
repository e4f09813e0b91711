use serde_json::Value as JsonValue;

use llmhub_protocol::codex::request::CreateResponseRequest;
use llmhub_protocol::codex::types::{
    InputContent, InputItem, InputRole, ResponseTool, ResponseToolChoice,
};
use llmhub_protocol::openai::request::CreateChatCompletionRequest;
use llmhub_protocol::openai::types::{
    ChatContent, ChatContentPart, ChatMessage, ChatRole, FunctionCall, FunctionDefinition,
    ImageUrl, NamedToolChoice, ToolCall, ToolCallType, ToolChoice, ToolChoiceFunction,
    ToolDefinition,
};

/// Convert a Response API request into an OpenAI chat-completions request.
/// `instructions` becomes a leading system message; call items fold back
/// into assistant `tool_calls` and `tool` messages.
pub fn transform_request(request: CreateResponseRequest) -> CreateChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(instructions) = request.instructions.filter(|text| !text.is_empty()) {
        messages.push(ChatMessage::text(ChatRole::System, instructions));
    }

    for item in request.input {
        match item {
            InputItem::Message { role, content } => {
                let role = map_role(role);
                if let Some(content) = map_contents(content) {
                    messages.push(ChatMessage {
                        role,
                        content: Some(content),
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
            }
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let call = ToolCall {
                    id: call_id,
                    r#type: ToolCallType::Function,
                    function: FunctionCall { name, arguments },
                };
                // Calls attach to the assistant turn that issued them.
                let attach = messages
                    .last()
                    .is_some_and(|last| matches!(last.role, ChatRole::Assistant));
                if attach {
                    let last = messages.last_mut().expect("non-empty after is_some_and");
                    last.tool_calls.get_or_insert_with(Vec::new).push(call);
                } else {
                    messages.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: None,
                        name: None,
                        tool_calls: Some(vec![call]),
                        tool_call_id: None,
                    });
                }
            }
            InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(ChatContent::Text(output_text(output))),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(call_id),
                });
            }
            InputItem::Unknown => {}
        }
    }

    CreateChatCompletionRequest {
        model: request.model,
        messages,
        stream: request.stream,
        max_tokens: None,
        max_completion_tokens: request.max_output_tokens,
        max_output_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: None,
        tools: request
            .tools
            .map(|tools| tools.into_iter().map(map_tool).collect()),
        tool_choice: request.tool_choice.map(map_tool_choice),
        parallel_tool_calls: request.parallel_tool_calls,
        store: request.store,
        user: None,
        session_id: request.prompt_cache_key,
        extra: serde_json::Map::new(),
    }
}

fn map_role(role: InputRole) -> ChatRole {
    match role {
        InputRole::System => ChatRole::System,
        InputRole::Developer => ChatRole::Developer,
        InputRole::User => ChatRole::User,
        InputRole::Assistant => ChatRole::Assistant,
    }
}

fn map_contents(contents: Vec<InputContent>) -> Option<ChatContent> {
    let mut parts = Vec::new();
    for content in contents {
        match content {
            InputContent::InputText { text } | InputContent::OutputText { text } => {
                parts.push(ChatContentPart::Text { text });
            }
            InputContent::InputImage { image_url } => {
                parts.push(ChatContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url,
                        detail: None,
                    },
                });
            }
            InputContent::Unknown => {}
        }
    }
    match parts.len() {
        0 => None,
        1 => match parts.pop() {
            Some(ChatContentPart::Text { text }) => Some(ChatContent::Text(text)),
            Some(part) => Some(ChatContent::Parts(vec![part])),
            None => None,
        },
        _ => Some(ChatContent::Parts(parts)),
    }
}

fn output_text(output: JsonValue) -> String {
    match output {
        JsonValue::String(text) => text,
        other => other.to_string(),
    }
}

fn map_tool(tool: ResponseTool) -> ToolDefinition {
    ToolDefinition {
        r#type: ToolCallType::Function,
        function: FunctionDefinition {
            name: tool.name,
            description: tool.description,
            parameters: Some(tool.parameters),
            strict: tool.strict,
        },
    }
}

fn map_tool_choice(choice: ResponseToolChoice) -> ToolChoice {
    match choice {
        ResponseToolChoice::Mode(mode) => ToolChoice::Mode(mode),
        ResponseToolChoice::Function(function) => ToolChoice::Named(NamedToolChoice {
            r#type: ToolCallType::Function,
            function: ToolChoiceFunction {
                name: function.name,
            },
        }),
    }
}
