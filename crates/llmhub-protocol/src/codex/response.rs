use serde::{Deserialize, Serialize};

use super::types::{OutputItem, ResponseUsage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub model: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
}

impl ResponseBody {
    pub fn skeleton(id: impl Into<String>, model: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            object: "response".to_string(),
            created_at,
            status: Some("in_progress".to_string()),
            model: model.into(),
            output: Vec::new(),
            usage: None,
        }
    }
}
