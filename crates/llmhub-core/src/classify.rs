use bytes::Bytes;
use serde_json::Value as JsonValue;

use llmhub_protocol::{ChatRequest, WireFormat};

use crate::error::RelayError;

/// Decide which wire family a request body belongs to, by shape:
/// 1. `request` object           -> gemini-cli envelope
/// 2. `input` array              -> Response API
/// 3. `messages` + `system` arrays -> claude
/// 4. `messages` array           -> openai chat
/// 5. anything else              -> claude
pub fn detect_format(body: &JsonValue) -> WireFormat {
    if body.get("request").is_some_and(JsonValue::is_object) {
        return WireFormat::GeminiCli;
    }
    if body.get("input").is_some_and(JsonValue::is_array) {
        return WireFormat::Codex;
    }
    if body.get("messages").is_some_and(JsonValue::is_array) {
        if body.get("system").is_some_and(JsonValue::is_array) {
            return WireFormat::Claude;
        }
        return WireFormat::OpenAiChat;
    }
    WireFormat::Claude
}

/// Parse the raw body into the typed request for its detected format.
pub fn parse_request(body: &Bytes) -> Result<ChatRequest, RelayError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("invalid json body: {err}")))?;
    let format = detect_format(&value);
    let request = match format {
        WireFormat::Claude => serde_json::from_value(value).map(ChatRequest::Claude),
        WireFormat::OpenAiChat => serde_json::from_value(value).map(ChatRequest::OpenAiChat),
        WireFormat::Codex => serde_json::from_value(value).map(ChatRequest::Codex),
        WireFormat::GeminiCli => serde_json::from_value(value).map(ChatRequest::GeminiCli),
    }
    .map_err(|err| RelayError::InvalidRequest(format!("malformed {format} request: {err}")))?;

    let model_missing = match request.model() {
        Some(model) => model.is_empty(),
        None => true,
    };
    if model_missing && format != WireFormat::GeminiCli {
        return Err(RelayError::InvalidRequest("missing model".to_string()));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detection_order_matches_the_contract() {
        assert_eq!(
            detect_format(&json!({"request": {"messages": []}})),
            WireFormat::GeminiCli
        );
        assert_eq!(detect_format(&json!({"input": []})), WireFormat::Codex);
        assert_eq!(
            detect_format(&json!({"messages": [], "system": []})),
            WireFormat::Claude
        );
        assert_eq!(detect_format(&json!({"messages": []})), WireFormat::OpenAiChat);
        assert_eq!(detect_format(&json!({"prompt": "hi"})), WireFormat::Claude);
    }

    #[test]
    fn missing_model_is_an_invalid_request() {
        let body = Bytes::from(serde_json::to_vec(&json!({"messages": []})).unwrap());
        assert!(matches!(
            parse_request(&body),
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn parses_typed_openai_request() {
        let body = Bytes::from(
            serde_json::to_vec(&json!({
                "model": "gpt-4.1",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true
            }))
            .unwrap(),
        );
        let request = parse_request(&body).unwrap();
        assert_eq!(request.format(), WireFormat::OpenAiChat);
        assert_eq!(request.model(), Some("gpt-4.1"));
        assert!(request.stream());
    }
}
