use llmhub_protocol::claude::response::MessageResponse;
use llmhub_protocol::claude::stream::{ContentDelta, DeltaUsage, MessageDelta, StreamEvent};
use llmhub_protocol::claude::types::{ContentBlock, StopReason};
use llmhub_protocol::openai::stream::ChatCompletionChunk;

use super::response::map_finish_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    ToolUse,
}

/// Re-expresses chat-completions chunks as Claude stream events. Claude
/// requires explicit block start/stop framing, so blocks open lazily and
/// close whenever the chunk stream switches shape.
#[derive(Debug)]
pub struct ChatToClaudeStreamState {
    model: String,
    started: bool,
    open: OpenBlock,
    next_index: usize,
    stop_reason: Option<StopReason>,
    usage_output: i64,
    usage_input: Option<i64>,
    finished: bool,
}

impl ChatToClaudeStreamState {
    pub fn new() -> Self {
        Self {
            model: "unknown".to_string(),
            started: false,
            open: OpenBlock::None,
            next_index: 0,
            stop_reason: None,
            usage_output: 0,
            usage_input: None,
            finished: false,
        }
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            self.model = chunk.model.clone();
            events.push(StreamEvent::MessageStart {
                message: MessageResponse::skeleton(chunk.id.clone(), chunk.model.clone()),
            });
        }

        if let Some(usage) = &chunk.usage {
            self.usage_output = usage.completion_tokens;
            self.usage_input = Some(usage.prompt_tokens);
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                if self.open == OpenBlock::ToolUse {
                    events.push(self.close_block());
                }
                if self.open == OpenBlock::None {
                    events.push(StreamEvent::ContentBlockStart {
                        index: self.next_index,
                        content_block: ContentBlock::Text {
                            text: String::new(),
                        },
                    });
                    self.open = OpenBlock::Text;
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.next_index,
                    delta: ContentDelta::TextDelta { text: content },
                });
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                if let (Some(id), Some(function)) = (call.id.clone(), call.function.clone())
                    && let Some(name) = function.name
                {
                    // A named call opens a fresh tool_use block.
                    if self.open != OpenBlock::None {
                        events.push(self.close_block());
                    }
                    events.push(StreamEvent::ContentBlockStart {
                        index: self.next_index,
                        content_block: ContentBlock::ToolUse {
                            id,
                            name,
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });
                    self.open = OpenBlock::ToolUse;
                }
                if let Some(arguments) = call.function.and_then(|function| function.arguments)
                    && !arguments.is_empty()
                    && self.open == OpenBlock::ToolUse
                {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.next_index,
                        delta: ContentDelta::InputJsonDelta {
                            partial_json: arguments,
                        },
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(map_finish_reason(reason));
            }
        }

        events
    }

    /// Emit block close, message_delta with usage, and message_stop.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if self.open != OpenBlock::None {
            events.push(self.close_block());
        }
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(self.stop_reason.unwrap_or(StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: Some(DeltaUsage {
                output_tokens: self.usage_output,
                input_tokens: self.usage_input,
            }),
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    fn close_block(&mut self) -> StreamEvent {
        let index = self.next_index;
        self.next_index += 1;
        self.open = OpenBlock::None;
        StreamEvent::ContentBlockStop { index }
    }
}

impl Default for ChatToClaudeStreamState {
    fn default() -> Self {
        Self::new()
    }
}
