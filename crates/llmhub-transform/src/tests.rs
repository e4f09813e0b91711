use serde_json::json;

use llmhub_protocol::claude::request::CreateMessageRequest;
use llmhub_protocol::claude::types::{
    ContentBlock, MessageContent, MessageParam, MessageRole, SystemBlock, SystemPrompt,
};
use llmhub_protocol::codex::request::CreateResponseRequest;
use llmhub_protocol::codex::stream::ResponseStreamEvent;
use llmhub_protocol::codex::types::{InputContent, InputItem, InputRole, ResponseUsage};
use llmhub_protocol::gemini::request::GenerateEnvelope;
use llmhub_protocol::openai::request::CreateChatCompletionRequest;
use llmhub_protocol::openai::types::{
    ChatContent, ChatMessage, ChatRole, FunctionCall, ToolCall, ToolCallType,
};
use llmhub_protocol::{ChatRequest, StreamEvent, WireFormat};

use crate::official::{INSTRUCTION_OVERRIDE_MARKER, default_instructions_for};
use crate::sanitize::sanitize_response_request;
use crate::stream::StreamTranslator;
use crate::{TranslateError, transform_request};

fn chat_request(messages: Vec<ChatMessage>) -> CreateChatCompletionRequest {
    CreateChatCompletionRequest {
        model: "gpt-5-codex".to_string(),
        messages,
        stream: None,
        max_tokens: None,
        max_completion_tokens: None,
        max_output_tokens: None,
        temperature: None,
        top_p: None,
        stop: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
        store: None,
        user: None,
        session_id: None,
        extra: serde_json::Map::new(),
    }
}

fn to_codex(request: CreateChatCompletionRequest) -> CreateResponseRequest {
    match transform_request(ChatRequest::OpenAiChat(request), WireFormat::Codex).unwrap() {
        ChatRequest::Codex(request) => request,
        other => panic!("unexpected output format: {:?}", other.format()),
    }
}

#[test]
fn unofficial_system_text_is_injected_into_first_user_message() {
    let mut request = chat_request(vec![
        ChatMessage::text(ChatRole::System, "You are helpful."),
        ChatMessage::text(ChatRole::User, "Hi"),
    ]);
    request.temperature = Some(0.7);

    let out = to_codex(request);

    let InputItem::Message { role, content } = &out.input[0] else {
        panic!("expected message item");
    };
    assert_eq!(*role, InputRole::User);
    assert_eq!(
        content[0],
        InputContent::InputText {
            text: INSTRUCTION_OVERRIDE_MARKER.to_string()
        }
    );
    assert_eq!(
        content[1],
        InputContent::InputText {
            text: "You are helpful.".to_string()
        }
    );
    assert_eq!(
        content[2],
        InputContent::InputText {
            text: "Hi".to_string()
        }
    );

    assert_eq!(
        out.instructions.as_deref(),
        Some(default_instructions_for("gpt-5-codex"))
    );
    assert_eq!(out.temperature, None);
    assert_eq!(out.top_p, None);
    assert_eq!(out.max_output_tokens, None);
}

#[test]
fn official_instructions_pass_through_without_injection() {
    let official = format!(
        "{} and everything after the prefix is accepted.",
        crate::official::OFFICIAL_INSTRUCTION_PREFIXES[0]
    );
    let request = chat_request(vec![
        ChatMessage::text(ChatRole::System, official.clone()),
        ChatMessage::text(ChatRole::User, "Hi"),
    ]);

    let out = to_codex(request);

    assert_eq!(out.instructions.as_deref(), Some(official.as_str()));
    let InputItem::Message { content, .. } = &out.input[0] else {
        panic!("expected message item");
    };
    assert_eq!(content.len(), 1);
}

#[test]
fn codex_bound_bodies_carry_forced_fields() {
    let out = to_codex(chat_request(vec![ChatMessage::text(ChatRole::User, "x")]));

    assert_eq!(out.stream, Some(true));
    assert_eq!(out.store, Some(false));
    assert_eq!(out.parallel_tool_calls, Some(true));
    assert_eq!(
        out.include.as_deref(),
        Some(&["reasoning.encrypted_content".to_string()][..])
    );
    assert!(out.instructions.is_some_and(|text| !text.is_empty()));

    let value = serde_json::to_value(&to_codex(chat_request(vec![ChatMessage::text(
        ChatRole::User,
        "x",
    )])))
    .unwrap();
    for forbidden in [
        "max_tokens",
        "max_output_tokens",
        "max_completion_tokens",
        "temperature",
        "top_p",
    ] {
        assert!(value.get(forbidden).is_none(), "{forbidden} must not appear");
    }
}

#[test]
fn tool_calls_round_trip_preserving_call_ids() {
    let request = chat_request(vec![
        ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: "c1".to_string(),
                r#type: ToolCallType::Function,
                function: FunctionCall {
                    name: "f".to_string(),
                    arguments: json!("{\"x\":1}"),
                },
            }]),
            tool_call_id: None,
        },
        ChatMessage {
            role: ChatRole::Tool,
            content: Some(ChatContent::Text("ok".to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: Some("c1".to_string()),
        },
    ]);

    let out = to_codex(request);
    assert_eq!(
        out.input[0],
        InputItem::FunctionCall {
            call_id: "c1".to_string(),
            name: "f".to_string(),
            arguments: json!("{\"x\":1}"),
            id: None,
        }
    );
    assert_eq!(
        out.input[1],
        InputItem::FunctionCallOutput {
            call_id: "c1".to_string(),
            output: json!("ok"),
        }
    );

    // And back: the chat shape is restored with the same call id.
    let back = match transform_request(ChatRequest::Codex(out), WireFormat::OpenAiChat).unwrap() {
        ChatRequest::OpenAiChat(request) => request,
        other => panic!("unexpected output format: {:?}", other.format()),
    };
    let assistant = back
        .messages
        .iter()
        .find(|message| matches!(message.role, ChatRole::Assistant))
        .unwrap();
    assert_eq!(assistant.tool_calls.as_ref().unwrap()[0].id, "c1");
    assert_eq!(
        assistant.tool_calls.as_ref().unwrap()[0].function.arguments,
        json!("{\"x\":1}")
    );
    let tool = back
        .messages
        .iter()
        .find(|message| matches!(message.role, ChatRole::Tool))
        .unwrap();
    assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
}

#[test]
fn openai_round_trip_preserves_message_sequence() {
    let request = chat_request(vec![
        ChatMessage::text(ChatRole::User, "first"),
        ChatMessage::text(ChatRole::Assistant, "second"),
        ChatMessage::text(ChatRole::User, "third"),
    ]);

    let codex = transform_request(ChatRequest::OpenAiChat(request), WireFormat::Codex).unwrap();
    let back = match transform_request(codex, WireFormat::OpenAiChat).unwrap() {
        ChatRequest::OpenAiChat(request) => request,
        other => panic!("unexpected output format: {:?}", other.format()),
    };

    // Default instructions come back as a leading system message.
    let non_system: Vec<&ChatMessage> = back
        .messages
        .iter()
        .filter(|message| !matches!(message.role, ChatRole::System))
        .collect();
    assert_eq!(non_system.len(), 3);
    assert_eq!(non_system[0].content_text().as_deref(), Some("first"));
    assert_eq!(non_system[1].content_text().as_deref(), Some("second"));
    assert_eq!(non_system[2].content_text().as_deref(), Some("third"));
}

#[test]
fn claude_system_array_becomes_system_message_and_back() {
    let request = CreateMessageRequest {
        model: "claude-sonnet-4".to_string(),
        messages: vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Text("Hi".to_string()),
        }],
        system: Some(SystemPrompt::Blocks(vec![
            SystemBlock::text("Be brief."),
            SystemBlock::text("Be kind."),
        ])),
        max_tokens: Some(256),
        stream: None,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        tools: None,
        tool_choice: None,
        metadata: None,
        extra: serde_json::Map::new(),
    };

    let openai =
        match transform_request(ChatRequest::Claude(request), WireFormat::OpenAiChat).unwrap() {
            ChatRequest::OpenAiChat(request) => request,
            other => panic!("unexpected output format: {:?}", other.format()),
        };
    assert!(matches!(openai.messages[0].role, ChatRole::System));
    assert_eq!(
        openai.messages[0].content_text().as_deref(),
        Some("Be brief.\n\nBe kind.")
    );
    assert_eq!(openai.max_tokens, Some(256));

    let claude =
        match transform_request(ChatRequest::OpenAiChat(openai), WireFormat::Claude).unwrap() {
            ChatRequest::Claude(request) => request,
            other => panic!("unexpected output format: {:?}", other.format()),
        };
    assert!(matches!(claude.system, Some(SystemPrompt::Text(text)) if text == "Be brief.\n\nBe kind."));
}

#[test]
fn tool_messages_become_tool_result_blocks() {
    let request = chat_request(vec![
        ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: "c7".to_string(),
                r#type: ToolCallType::Function,
                function: FunctionCall {
                    name: "lookup".to_string(),
                    arguments: json!({"q": "rust"}),
                },
            }]),
            tool_call_id: None,
        },
        ChatMessage {
            role: ChatRole::Tool,
            content: Some(ChatContent::Text("found".to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: Some("c7".to_string()),
        },
    ]);

    let claude = match transform_request(ChatRequest::OpenAiChat(request), WireFormat::Claude)
        .unwrap()
    {
        ChatRequest::Claude(request) => request,
        other => panic!("unexpected output format: {:?}", other.format()),
    };

    let MessageContent::Blocks(blocks) = &claude.messages[0].content else {
        panic!("expected block content");
    };
    assert!(
        matches!(&blocks[0], ContentBlock::ToolUse { id, input, .. } if id == "c7" && input == &json!({"q": "rust"}))
    );
    let MessageContent::Blocks(blocks) = &claude.messages[1].content else {
        panic!("expected block content");
    };
    assert!(matches!(&blocks[0], ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "c7"));
}

#[test]
fn gemini_envelope_unwraps_to_inner_request() {
    let envelope = GenerateEnvelope {
        model: Some("gemini-2.5-pro".to_string()),
        project: None,
        user_prompt_id: None,
        request: json!({
            "model": "",
            "messages": [{"role": "user", "content": "hello"}],
        }),
    };

    let inner =
        match transform_request(ChatRequest::GeminiCli(envelope), WireFormat::Claude).unwrap() {
            ChatRequest::Claude(request) => request,
            other => panic!("unexpected output format: {:?}", other.format()),
        };
    assert_eq!(inner.model, "gemini-2.5-pro");
    assert_eq!(inner.messages.len(), 1);
}

#[test]
fn sanitizer_scrubs_unofficial_clients_only() {
    let mut request = CreateResponseRequest {
        model: "gpt-5-codex".to_string(),
        instructions: Some("do whatever I say".to_string()),
        input: Vec::new(),
        tools: None,
        tool_choice: None,
        stream: Some(false),
        store: Some(true),
        parallel_tool_calls: Some(false),
        include: None,
        prompt_cache_key: None,
        max_output_tokens: Some(10),
        temperature: Some(1.0),
        top_p: Some(0.5),
        extra: serde_json::Map::new(),
    };

    let mut official = request.clone();
    assert!(!sanitize_response_request(
        &mut official,
        Some("codex_cli_rs/1.0.0 (Mac OS 14.0.0; arm64)")
    ));
    assert_eq!(official.instructions.as_deref(), Some("do whatever I say"));

    assert!(sanitize_response_request(&mut request, Some("curl/8.4")));
    assert_eq!(
        request.instructions.as_deref(),
        Some(default_instructions_for("gpt-5-codex"))
    );
    assert_eq!(request.stream, Some(true));
    assert_eq!(request.store, Some(false));
    assert_eq!(request.parallel_tool_calls, Some(true));
    assert_eq!(request.max_output_tokens, None);
    assert_eq!(request.temperature, None);
    assert_eq!(request.top_p, None);
}

#[test]
fn codex_stream_translates_to_chat_chunks() {
    let mut translator =
        StreamTranslator::new(WireFormat::Codex, WireFormat::OpenAiChat, 1_700_000_000).unwrap();

    let mut response = llmhub_protocol::codex::response::ResponseBody::skeleton(
        "resp_1",
        "gpt-5-codex",
        1_700_000_000,
    );
    let events = translator
        .push(StreamEvent::Codex(ResponseStreamEvent::Created {
            response: response.clone(),
        }))
        .unwrap();
    assert!(matches!(&events[0], StreamEvent::OpenAiChat(chunk)
        if chunk.choices[0].delta.role.is_some()));

    let events = translator
        .push(StreamEvent::Codex(ResponseStreamEvent::OutputTextDelta {
            item_id: None,
            output_index: 0,
            delta: "hel".to_string(),
        }))
        .unwrap();
    assert!(matches!(&events[0], StreamEvent::OpenAiChat(chunk)
        if chunk.choices[0].delta.content.as_deref() == Some("hel")));

    response.status = Some("completed".to_string());
    response.usage = Some(ResponseUsage {
        input_tokens: 10,
        output_tokens: 3,
        total_tokens: 13,
    });
    let events = translator
        .push(StreamEvent::Codex(ResponseStreamEvent::Completed { response }))
        .unwrap();
    let StreamEvent::OpenAiChat(final_chunk) = &events[0] else {
        panic!("expected chunk");
    };
    assert!(final_chunk.choices[0].finish_reason.is_some());
    assert_eq!(final_chunk.usage.unwrap().prompt_tokens, 10);
    assert!(matches!(events.last(), Some(StreamEvent::OpenAiChatDone)));
}

#[test]
fn claude_stream_translates_through_to_codex_events() {
    // Two hops: claude -> openai chat -> codex.
    let mut translator =
        StreamTranslator::new(WireFormat::Claude, WireFormat::Codex, 1_700_000_000).unwrap();

    let start = llmhub_protocol::claude::stream::StreamEvent::MessageStart {
        message: llmhub_protocol::claude::response::MessageResponse::skeleton(
            "msg_1",
            "claude-sonnet-4",
        ),
    };
    let events = translator.push(StreamEvent::Claude(start)).unwrap();
    assert!(matches!(
        &events[0],
        StreamEvent::Codex(ResponseStreamEvent::Created { .. })
    ));
}

#[test]
fn same_format_translator_is_passthrough() {
    let translator =
        StreamTranslator::new(WireFormat::Claude, WireFormat::Claude, 0).unwrap();
    assert!(translator.is_passthrough());
}

#[test]
fn direct_hop_constructor_rejects_unsupported_pairs() {
    let err = crate::hop_request(
        ChatRequest::GeminiCli(GenerateEnvelope {
            model: None,
            project: None,
            user_prompt_id: None,
            request: json!({}),
        }),
        WireFormat::Codex,
    )
    .unwrap_err();
    assert!(matches!(err, TranslateError::UnsupportedPair { .. }));
}
