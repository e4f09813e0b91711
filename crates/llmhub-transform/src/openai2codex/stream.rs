use std::collections::BTreeMap;

use llmhub_protocol::codex::response::ResponseBody;
use llmhub_protocol::codex::stream::ResponseStreamEvent;
use llmhub_protocol::codex::types::{
    InputRole, OutputContent, OutputItem, ResponseUsage,
};
use llmhub_protocol::openai::stream::ChatCompletionChunk;
use llmhub_protocol::openai::types::FinishReason;

use super::response::map_usage;

#[derive(Debug, Clone)]
struct MessageState {
    output_index: i64,
    item_id: String,
    text: String,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    output_index: i64,
    call_id: String,
    name: String,
    arguments: String,
}

/// Re-expresses a chat-completions chunk stream as Response API events.
/// Output items are opened lazily and closed when the stream finishes.
#[derive(Debug)]
pub struct ChatToCodexStreamState {
    id: String,
    model: String,
    created_at: i64,
    created_sent: bool,
    next_output_index: i64,
    message: Option<MessageState>,
    tool_calls: BTreeMap<i64, ToolCallState>,
    usage: Option<ResponseUsage>,
    finish_reason: Option<FinishReason>,
    finished: bool,
}

impl ChatToCodexStreamState {
    pub fn new(created_at: i64) -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            created_at,
            created_sent: false,
            next_output_index: 0,
            message: None,
            tool_calls: BTreeMap::new(),
            usage: None,
            finish_reason: None,
            finished: false,
        }
    }

    pub fn transform_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<ResponseStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if self.id.is_empty() {
            self.id = chunk.id.clone();
            self.model = chunk.model.clone();
            if chunk.created > 0 {
                self.created_at = chunk.created;
            }
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(map_usage(usage));
        }

        let mut events = Vec::new();
        if !self.created_sent {
            self.created_sent = true;
            events.push(ResponseStreamEvent::Created {
                response: self.skeleton(),
            });
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                events.extend(self.push_text(content));
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let state = self.tool_calls.entry(call.index).or_insert_with(|| {
                    ToolCallState {
                        output_index: -1,
                        call_id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    }
                });
                if let Some(id) = call.id
                    && state.call_id.is_empty()
                {
                    state.call_id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name
                        && state.name.is_empty()
                    {
                        state.name = name;
                    }
                    if let Some(arguments) = function.arguments
                        && !arguments.is_empty()
                    {
                        // Announce the item once we can name it.
                        if state.output_index < 0 && !state.name.is_empty() {
                            state.output_index = self.next_output_index;
                            self.next_output_index += 1;
                            events.push(ResponseStreamEvent::OutputItemAdded {
                                output_index: state.output_index,
                                item: OutputItem::FunctionCall {
                                    id: Some(state.call_id.clone()),
                                    call_id: state.call_id.clone(),
                                    name: state.name.clone(),
                                    arguments: serde_json::Value::String(String::new()),
                                    status: Some("in_progress".to_string()),
                                },
                            });
                        }
                        state.arguments.push_str(&arguments);
                        if state.output_index >= 0 {
                            events.push(ResponseStreamEvent::FunctionCallArgumentsDelta {
                                item_id: Some(state.call_id.clone()),
                                output_index: state.output_index,
                                delta: arguments,
                            });
                        }
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        events
    }

    /// Close every open item and emit the terminal event. Idempotent.
    pub fn finish(&mut self) -> Vec<ResponseStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        let mut output = Vec::new();

        if let Some(message) = self.message.take() {
            events.push(ResponseStreamEvent::OutputTextDone {
                item_id: Some(message.item_id.clone()),
                output_index: message.output_index,
                text: message.text.clone(),
            });
            let item = OutputItem::Message {
                id: Some(message.item_id),
                role: InputRole::Assistant,
                status: Some("completed".to_string()),
                content: vec![OutputContent::OutputText { text: message.text }],
            };
            events.push(ResponseStreamEvent::OutputItemDone {
                output_index: message.output_index,
                item: item.clone(),
            });
            output.push(item);
        }

        for state in std::mem::take(&mut self.tool_calls).into_values() {
            if state.output_index < 0 {
                continue;
            }
            events.push(ResponseStreamEvent::FunctionCallArgumentsDone {
                item_id: Some(state.call_id.clone()),
                output_index: state.output_index,
                arguments: state.arguments.clone(),
            });
            let item = OutputItem::FunctionCall {
                id: Some(state.call_id.clone()),
                call_id: state.call_id,
                name: state.name,
                arguments: serde_json::Value::String(state.arguments),
                status: Some("completed".to_string()),
            };
            events.push(ResponseStreamEvent::OutputItemDone {
                output_index: state.output_index,
                item: item.clone(),
            });
            output.push(item);
        }

        let mut response = self.skeleton();
        response.output = output;
        response.usage = self.usage;
        if matches!(self.finish_reason, Some(FinishReason::Length)) {
            response.status = Some("incomplete".to_string());
            events.push(ResponseStreamEvent::Incomplete { response });
        } else {
            response.status = Some("completed".to_string());
            events.push(ResponseStreamEvent::Completed { response });
        }
        events
    }

    fn push_text(&mut self, content: String) -> Vec<ResponseStreamEvent> {
        let mut events = Vec::new();
        if self.message.is_none() {
            let output_index = self.next_output_index;
            self.next_output_index += 1;
            let item_id = format!("msg_{}", self.id);
            events.push(ResponseStreamEvent::OutputItemAdded {
                output_index,
                item: OutputItem::Message {
                    id: Some(item_id.clone()),
                    role: InputRole::Assistant,
                    status: Some("in_progress".to_string()),
                    content: Vec::new(),
                },
            });
            self.message = Some(MessageState {
                output_index,
                item_id,
                text: String::new(),
            });
        }
        if let Some(message) = self.message.as_mut() {
            message.text.push_str(&content);
            events.push(ResponseStreamEvent::OutputTextDelta {
                item_id: Some(message.item_id.clone()),
                output_index: message.output_index,
                delta: content,
            });
        }
        events
    }

    fn skeleton(&self) -> ResponseBody {
        let id = if self.id.is_empty() {
            "response".to_string()
        } else {
            self.id.clone()
        };
        let model = if self.model.is_empty() {
            "unknown".to_string()
        } else {
            self.model.clone()
        };
        ResponseBody::skeleton(id, model, self.created_at)
    }
}
