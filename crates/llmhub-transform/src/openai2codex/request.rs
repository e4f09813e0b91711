use serde_json::Value as JsonValue;

use llmhub_protocol::codex::request::CreateResponseRequest;
use llmhub_protocol::codex::types::{
    FunctionToolChoice, InputContent, InputItem, InputRole, ResponseTool, ResponseToolChoice,
    ResponseToolType,
};
use llmhub_protocol::openai::request::CreateChatCompletionRequest;
use llmhub_protocol::openai::types::{
    ChatContent, ChatContentPart, ChatMessage, ChatRole, ToolChoice, ToolDefinition,
};

use crate::official::{INSTRUCTION_OVERRIDE_MARKER, default_instructions_for, is_official_instructions};

/// Convert an OpenAI chat-completions request into a Response API request.
///
/// System text moves into `instructions` only when it matches an official
/// prompt; otherwise it is injected ahead of the first user message and the
/// model's default instructions are used. `stream`, `store`,
/// `parallel_tool_calls`, and `include` are pinned regardless of what the
/// client sent, and sampling/length parameters the upstream rejects are
/// dropped.
pub fn transform_request(request: CreateChatCompletionRequest) -> CreateResponseRequest {
    let mut instruction_texts = Vec::new();
    let mut conversation = Vec::new();
    for message in request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(text) = message.content_text()
                    && !text.is_empty()
                {
                    instruction_texts.push(text);
                }
            }
            _ => conversation.push(message),
        }
    }

    let extracted = instruction_texts.join("\n\n");
    let official = is_official_instructions(&extracted);
    let mut inject_pending = !extracted.is_empty() && !official;

    let mut input = Vec::new();
    for message in conversation {
        if matches!(message.role, ChatRole::Tool) {
            input.push(InputItem::FunctionCallOutput {
                call_id: message.tool_call_id.clone().unwrap_or_default(),
                output: JsonValue::String(message.content_text().unwrap_or_default()),
            });
            continue;
        }

        let mut contents = map_message_content(&message);
        if inject_pending && matches!(message.role, ChatRole::User) {
            let mut headed = Vec::with_capacity(contents.len() + 2);
            headed.push(InputContent::InputText {
                text: INSTRUCTION_OVERRIDE_MARKER.to_string(),
            });
            headed.push(InputContent::InputText {
                text: extracted.clone(),
            });
            headed.append(&mut contents);
            contents = headed;
            inject_pending = false;
        }
        if !contents.is_empty() {
            input.push(InputItem::Message {
                role: map_role(message.role),
                content: contents,
            });
        }

        if let Some(tool_calls) = message.tool_calls {
            for call in tool_calls {
                input.push(InputItem::FunctionCall {
                    call_id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                    id: None,
                });
            }
        }
    }

    let instructions = if official {
        extracted
    } else {
        default_instructions_for(&request.model).to_string()
    };

    CreateResponseRequest {
        model: request.model,
        instructions: Some(instructions),
        input,
        tools: request
            .tools
            .map(|tools| tools.into_iter().map(map_tool).collect()),
        tool_choice: request.tool_choice.map(map_tool_choice),
        stream: Some(true),
        store: Some(false),
        parallel_tool_calls: Some(true),
        include: Some(vec!["reasoning.encrypted_content".to_string()]),
        prompt_cache_key: request.session_id,
        max_output_tokens: None,
        temperature: None,
        top_p: None,
        extra: serde_json::Map::new(),
    }
}

fn map_role(role: ChatRole) -> InputRole {
    match role {
        ChatRole::Assistant => InputRole::Assistant,
        _ => InputRole::User,
    }
}

fn map_message_content(message: &ChatMessage) -> Vec<InputContent> {
    let assistant = matches!(message.role, ChatRole::Assistant);
    let mut contents = Vec::new();
    match &message.content {
        Some(ChatContent::Text(text)) => {
            if !text.is_empty() {
                contents.push(text_content(assistant, text.clone()));
            }
        }
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ChatContentPart::Text { text } => {
                        contents.push(text_content(assistant, text.clone()));
                    }
                    ChatContentPart::ImageUrl { image_url } => {
                        contents.push(InputContent::InputImage {
                            image_url: image_url.url.clone(),
                        });
                    }
                    ChatContentPart::Unknown => {}
                }
            }
        }
        None => {}
    }
    contents
}

fn text_content(assistant: bool, text: String) -> InputContent {
    if assistant {
        InputContent::OutputText { text }
    } else {
        InputContent::InputText { text }
    }
}

fn map_tool(tool: ToolDefinition) -> ResponseTool {
    ResponseTool {
        r#type: ResponseToolType::Function,
        name: tool.function.name,
        description: tool.function.description,
        parameters: tool
            .function
            .parameters
            .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new())),
        strict: tool.function.strict,
    }
}

fn map_tool_choice(choice: ToolChoice) -> ResponseToolChoice {
    match choice {
        ToolChoice::Mode(mode) => ResponseToolChoice::Mode(mode),
        ToolChoice::Named(named) => ResponseToolChoice::Function(FunctionToolChoice {
            r#type: ResponseToolType::Function,
            name: named.function.name,
        }),
    }
}
