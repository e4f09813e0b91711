use llmhub_protocol::codex::response::ResponseBody;
use llmhub_protocol::codex::types::{InputRole, OutputContent, OutputItem, ResponseUsage};
use llmhub_protocol::openai::response::ChatCompletionResponse;
use llmhub_protocol::openai::types::{CompletionUsage, FinishReason};

/// Convert a complete chat-completions response into a Response API body.
pub fn transform_response(response: ChatCompletionResponse) -> ResponseBody {
    let mut output = Vec::new();
    let mut status = "completed".to_string();

    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(content) = choice.message.content
            && !content.is_empty()
        {
            output.push(OutputItem::Message {
                id: Some(format!("msg_{}", response.id)),
                role: InputRole::Assistant,
                status: Some("completed".to_string()),
                content: vec![OutputContent::OutputText { text: content }],
            });
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for call in tool_calls {
                output.push(OutputItem::FunctionCall {
                    id: Some(call.id.clone()),
                    call_id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                    status: Some("completed".to_string()),
                });
            }
        }
        if matches!(choice.finish_reason, Some(FinishReason::Length)) {
            status = "incomplete".to_string();
        }
    }

    ResponseBody {
        id: response.id,
        object: "response".to_string(),
        created_at: response.created,
        status: Some(status),
        model: response.model,
        output,
        usage: response.usage.map(map_usage),
    }
}

pub(crate) fn map_usage(usage: CompletionUsage) -> ResponseUsage {
    ResponseUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}
