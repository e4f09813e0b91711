use std::collections::BTreeMap;

use llmhub_protocol::codex::stream::ResponseStreamEvent;
use llmhub_protocol::codex::types::OutputItem;
use llmhub_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallChunk, ToolCallChunk,
};
use llmhub_protocol::openai::types::{ChatRole, FinishReason, ToolCallType};

use super::response::map_usage;

/// Re-expresses Response API events as chat-completions chunks followed by
/// the `[DONE]` terminator (the caller appends it on `Completed`).
#[derive(Debug)]
pub struct CodexToChatStreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    saw_tool_call: bool,
    /// Response output_index -> chat tool_calls index.
    tool_indexes: BTreeMap<i64, i64>,
    finished: bool,
}

impl CodexToChatStreamState {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl".to_string(),
            model: "unknown".to_string(),
            created,
            role_sent: false,
            saw_tool_call: false,
            tool_indexes: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn transform_event(&mut self, event: ResponseStreamEvent) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        match event {
            ResponseStreamEvent::Created { response } => {
                self.id = response.id;
                self.model = response.model;
                if response.created_at > 0 {
                    self.created = response.created_at;
                }
                self.role_sent = true;
                vec![self.chunk(
                    ChunkDelta {
                        role: Some(ChatRole::Assistant),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }
            ResponseStreamEvent::OutputTextDelta { delta, .. } => {
                let mut chunks = self.ensure_role();
                chunks.push(self.chunk(
                    ChunkDelta {
                        content: Some(delta),
                        ..ChunkDelta::default()
                    },
                    None,
                ));
                chunks
            }
            ResponseStreamEvent::OutputItemAdded { output_index, item } => {
                let OutputItem::FunctionCall { call_id, name, .. } = item else {
                    return Vec::new();
                };
                self.saw_tool_call = true;
                let index = self.tool_indexes.len() as i64;
                self.tool_indexes.insert(output_index, index);
                let mut chunks = self.ensure_role();
                chunks.push(self.chunk(
                    ChunkDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index,
                            id: Some(call_id),
                            r#type: Some(ToolCallType::Function),
                            function: Some(FunctionCallChunk {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                ));
                chunks
            }
            ResponseStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
                ..
            } => {
                let Some(index) = self.tool_indexes.get(&output_index).copied() else {
                    return Vec::new();
                };
                vec![self.chunk(
                    ChunkDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index,
                            id: None,
                            r#type: None,
                            function: Some(FunctionCallChunk {
                                name: None,
                                arguments: Some(delta),
                            }),
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }
            ResponseStreamEvent::Completed { response }
            | ResponseStreamEvent::Failed { response }
            | ResponseStreamEvent::Incomplete { response } => {
                self.finished = true;
                let finish_reason = if self.saw_tool_call {
                    FinishReason::ToolCalls
                } else if response.status.as_deref() == Some("incomplete") {
                    FinishReason::Length
                } else {
                    FinishReason::Stop
                };
                let mut chunk = self.finish_chunk(finish_reason);
                chunk.usage = response.usage.map(map_usage);
                vec![chunk]
            }
            _ => Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn ensure_role(&mut self) -> Vec<ChatCompletionChunk> {
        if self.role_sent {
            return Vec::new();
        }
        self.role_sent = true;
        vec![self.chunk(
            ChunkDelta {
                role: Some(ChatRole::Assistant),
                ..ChunkDelta::default()
            },
            None,
        )]
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        let mut chunk = ChatCompletionChunk::skeleton(self.id.clone(), self.model.clone(), self.created);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        });
        chunk
    }

    fn finish_chunk(&self, finish_reason: FinishReason) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some(finish_reason))
    }
}
