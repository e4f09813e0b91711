use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Response counterpart of the CLI envelope: the upstream payload sits under
/// a single `response` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub response: JsonValue,
}

impl ResponseEnvelope {
    pub fn wrap(response: JsonValue) -> Self {
        Self { response }
    }
}
