use std::collections::BTreeMap;

use llmhub_protocol::claude::stream::{ContentDelta, StreamEvent};
use llmhub_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallChunk, ToolCallChunk,
};
use llmhub_protocol::openai::types::{ChatRole, CompletionUsage, FinishReason, ToolCallType};

use super::response::map_stop_reason;

/// Re-expresses Claude stream events as chat-completions chunks.
#[derive(Debug)]
pub struct ClaudeToChatStreamState {
    id: String,
    model: String,
    created: i64,
    input_tokens: i64,
    /// Claude block index -> chat tool_calls index.
    tool_indexes: BTreeMap<usize, i64>,
    finish_reason: Option<FinishReason>,
    finished: bool,
}

impl ClaudeToChatStreamState {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl".to_string(),
            model: "unknown".to_string(),
            created,
            input_tokens: 0,
            tool_indexes: BTreeMap::new(),
            finish_reason: None,
            finished: false,
        }
    }

    pub fn transform_event(&mut self, event: StreamEvent) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        match event {
            StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.input_tokens = message.usage.input_tokens;
                vec![self.chunk(
                    ChunkDelta {
                        role: Some(ChatRole::Assistant),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                llmhub_protocol::claude::types::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.tool_indexes.len() as i64;
                    self.tool_indexes.insert(index, tool_index);
                    vec![self.chunk(
                        ChunkDelta {
                            tool_calls: Some(vec![ToolCallChunk {
                                index: tool_index,
                                id: Some(id),
                                r#type: Some(ToolCallType::Function),
                                function: Some(FunctionCallChunk {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..ChunkDelta::default()
                        },
                        None,
                    )]
                }
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => vec![self.chunk(
                    ChunkDelta {
                        content: Some(text),
                        ..ChunkDelta::default()
                    },
                    None,
                )],
                ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_indexes.get(&index).copied() else {
                        return Vec::new();
                    };
                    vec![self.chunk(
                        ChunkDelta {
                            tool_calls: Some(vec![ToolCallChunk {
                                index: tool_index,
                                id: None,
                                r#type: None,
                                function: Some(FunctionCallChunk {
                                    name: None,
                                    arguments: Some(partial_json),
                                }),
                            }]),
                            ..ChunkDelta::default()
                        },
                        None,
                    )]
                }
                _ => Vec::new(),
            },
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(map_stop_reason(reason));
                }
                let usage = usage.map(|usage| CompletionUsage {
                    prompt_tokens: usage.input_tokens.unwrap_or(self.input_tokens),
                    completion_tokens: usage.output_tokens,
                    total_tokens: usage.input_tokens.unwrap_or(self.input_tokens)
                        + usage.output_tokens,
                });
                let mut chunk = self.chunk(
                    ChunkDelta::default(),
                    Some(self.finish_reason.unwrap_or(FinishReason::Stop)),
                );
                chunk.usage = usage;
                vec![chunk]
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        let mut chunk =
            ChatCompletionChunk::skeleton(self.id.clone(), self.model.clone(), self.created);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        });
        chunk
    }
}
