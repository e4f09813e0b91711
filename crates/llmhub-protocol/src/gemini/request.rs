use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The Gemini CLI wraps an inner request in a thin envelope. The envelope is
/// structural only; the proxy never interprets the inner request here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt_id: Option<String>,
    pub request: JsonValue,
}
