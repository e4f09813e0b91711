use llmhub_protocol::{StreamEvent, WireFormat};

use crate::claude2openai::stream::ClaudeToChatStreamState;
use crate::codex2openai::stream::CodexToChatStreamState;
use crate::openai2claude::stream::ChatToClaudeStreamState;
use crate::openai2codex::stream::ChatToCodexStreamState;
use crate::{TranslateError, geminicli, next_hop};

enum HopState {
    CodexToChat(CodexToChatStreamState),
    ChatToCodex(ChatToCodexStreamState),
    ClaudeToChat(ClaudeToChatStreamState),
    ChatToClaude(ChatToClaudeStreamState),
    UnwrapGeminiCli,
    WrapGeminiCli,
}

impl HopState {
    fn new(from: WireFormat, to: WireFormat, created_at: i64) -> Result<Self, TranslateError> {
        match (from, to) {
            (WireFormat::Codex, WireFormat::OpenAiChat) => {
                Ok(HopState::CodexToChat(CodexToChatStreamState::new(created_at)))
            }
            (WireFormat::OpenAiChat, WireFormat::Codex) => {
                Ok(HopState::ChatToCodex(ChatToCodexStreamState::new(created_at)))
            }
            (WireFormat::Claude, WireFormat::OpenAiChat) => {
                Ok(HopState::ClaudeToChat(ClaudeToChatStreamState::new(created_at)))
            }
            (WireFormat::OpenAiChat, WireFormat::Claude) => {
                Ok(HopState::ChatToClaude(ChatToClaudeStreamState::new()))
            }
            (WireFormat::GeminiCli, WireFormat::Claude) => Ok(HopState::UnwrapGeminiCli),
            (WireFormat::Claude, WireFormat::GeminiCli) => Ok(HopState::WrapGeminiCli),
            _ => Err(TranslateError::UnsupportedPair { from, to }),
        }
    }

    fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, TranslateError> {
        match (self, event) {
            (HopState::CodexToChat(state), StreamEvent::Codex(event)) => {
                let finished_before = state.is_finished();
                let mut out: Vec<StreamEvent> = state
                    .transform_event(event)
                    .into_iter()
                    .map(StreamEvent::OpenAiChat)
                    .collect();
                if !finished_before && state.is_finished() {
                    out.push(StreamEvent::OpenAiChatDone);
                }
                Ok(out)
            }
            (HopState::ChatToCodex(state), StreamEvent::OpenAiChat(chunk)) => Ok(state
                .transform_chunk(chunk)
                .into_iter()
                .map(StreamEvent::Codex)
                .collect()),
            (HopState::ChatToCodex(state), StreamEvent::OpenAiChatDone) => Ok(state
                .finish()
                .into_iter()
                .map(StreamEvent::Codex)
                .collect()),
            (HopState::ClaudeToChat(state), StreamEvent::Claude(event)) => {
                let finished_before = state.is_finished();
                let mut out: Vec<StreamEvent> = state
                    .transform_event(event)
                    .into_iter()
                    .map(StreamEvent::OpenAiChat)
                    .collect();
                if !finished_before && state.is_finished() {
                    out.push(StreamEvent::OpenAiChatDone);
                }
                Ok(out)
            }
            (HopState::ChatToClaude(state), StreamEvent::OpenAiChat(chunk)) => Ok(state
                .transform_chunk(chunk)
                .into_iter()
                .map(StreamEvent::Claude)
                .collect()),
            (HopState::ChatToClaude(state), StreamEvent::OpenAiChatDone) => Ok(state
                .finish()
                .into_iter()
                .map(StreamEvent::Claude)
                .collect()),
            (HopState::UnwrapGeminiCli, StreamEvent::GeminiCli(value)) => Ok(
                match geminicli::unwrap_stream_event(value) {
                    Ok(event) => vec![StreamEvent::Claude(event)],
                    Err(_) => Vec::new(),
                },
            ),
            (HopState::WrapGeminiCli, StreamEvent::Claude(event)) => Ok(
                match geminicli::wrap_stream_event(&event) {
                    Ok(value) => vec![StreamEvent::GeminiCli(value)],
                    Err(_) => Vec::new(),
                },
            ),
            _ => Err(TranslateError::FormatMismatch),
        }
    }
}

/// Translates one stream of logical events into another format, hopping
/// through intermediate formats when there is no direct state machine.
/// Events are emitted as soon as each hop produces them.
pub struct StreamTranslator {
    hops: Vec<HopState>,
}

impl StreamTranslator {
    pub fn new(from: WireFormat, to: WireFormat, created_at: i64) -> Result<Self, TranslateError> {
        let mut hops = Vec::new();
        let mut current = from;
        while current != to {
            let hop = next_hop(current, to);
            hops.push(HopState::new(current, hop, created_at)?);
            current = hop;
        }
        Ok(Self { hops })
    }

    pub fn is_passthrough(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn push(&mut self, event: StreamEvent) -> Result<Vec<StreamEvent>, TranslateError> {
        let mut events = vec![event];
        for hop in &mut self.hops {
            let mut next = Vec::new();
            for event in events {
                next.extend(hop.push(event)?);
            }
            events = next;
            if events.is_empty() {
                break;
            }
        }
        Ok(events)
    }
}
