use serde_json::Value as JsonValue;

use llmhub_protocol::claude::request::CreateMessageRequest;
use llmhub_protocol::claude::response::MessageResponse;
use llmhub_protocol::claude::stream::StreamEvent as ClaudeStreamEvent;
use llmhub_protocol::gemini::request::GenerateEnvelope;
use llmhub_protocol::gemini::response::ResponseEnvelope;

use crate::TranslateError;

/// Pull the inner request out of the CLI envelope. The envelope is purely
/// structural; a missing inner model falls back to the envelope's.
pub fn unwrap_request(envelope: GenerateEnvelope) -> Result<CreateMessageRequest, TranslateError> {
    let mut inner: CreateMessageRequest = serde_json::from_value(envelope.request)
        .map_err(|_| TranslateError::MalformedEnvelope("request"))?;
    if inner.model.is_empty()
        && let Some(model) = envelope.model
    {
        inner.model = model;
    }
    Ok(inner)
}

pub fn wrap_request(request: CreateMessageRequest) -> Result<GenerateEnvelope, serde_json::Error> {
    let model = request.model.clone();
    Ok(GenerateEnvelope {
        model: Some(model),
        project: None,
        user_prompt_id: None,
        request: serde_json::to_value(request)?,
    })
}

pub fn unwrap_response(envelope: JsonValue) -> Result<MessageResponse, TranslateError> {
    let inner = envelope
        .get("response")
        .cloned()
        .unwrap_or(envelope);
    serde_json::from_value(inner).map_err(|_| TranslateError::MalformedEnvelope("response"))
}

pub fn wrap_response(response: MessageResponse) -> Result<JsonValue, serde_json::Error> {
    serde_json::to_value(ResponseEnvelope::wrap(serde_json::to_value(response)?))
}

/// Stream framing: each inner event travels under the same `response` key.
pub fn wrap_stream_event(event: &ClaudeStreamEvent) -> Result<JsonValue, serde_json::Error> {
    serde_json::to_value(ResponseEnvelope::wrap(serde_json::to_value(event)?))
}

pub fn unwrap_stream_event(value: JsonValue) -> Result<ClaudeStreamEvent, TranslateError> {
    let inner = value.get("response").cloned().unwrap_or(value);
    serde_json::from_value(inner).map_err(|_| TranslateError::MalformedEnvelope("stream event"))
}
