use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use llmhub_protocol::WireFormat;

/// Which upstream API family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Claude,
    OpenAiCompatible,
    Codex,
    GeminiCli,
}

impl ProviderType {
    pub fn wire_format(&self) -> WireFormat {
        match self {
            ProviderType::Claude => WireFormat::Claude,
            ProviderType::OpenAiCompatible => WireFormat::OpenAiChat,
            ProviderType::Codex => WireFormat::Codex,
            ProviderType::GeminiCli => WireFormat::GeminiCli,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Claude => "claude",
            ProviderType::OpenAiCompatible => "openai-compatible",
            ProviderType::Codex => "codex",
            ProviderType::GeminiCli => "gemini-cli",
        }
    }
}

/// One upstream endpoint plus its routing and quota policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    /// Outbound credential. Never logged, never echoed to clients.
    pub api_key: String,
    pub provider_type: ProviderType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Selection bias inside a priority band; 0 only draws when the whole
    /// band is zero-weighted.
    #[serde(default)]
    pub weight: u32,
    /// Lower number wins.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cost_per_mtok: Option<f64>,
    #[serde(default)]
    pub group_tag: Option<String>,
    #[serde(default)]
    pub limit_5h_usd: Option<f64>,
    #[serde(default)]
    pub limit_weekly_usd: Option<f64>,
    #[serde(default)]
    pub limit_monthly_usd: Option<f64>,
    #[serde(default)]
    pub limit_concurrent_sessions: Option<u32>,
    /// Tokens per minute.
    #[serde(default)]
    pub tpm: Option<u64>,
    /// Requests per minute.
    #[serde(default)]
    pub rpm: Option<u64>,
    /// Requests per day.
    #[serde(default)]
    pub rpd: Option<u64>,
    /// Hard cap on in-flight calls, independent of session accounting.
    #[serde(default)]
    pub cc: Option<u32>,
    /// Rewrites applied to the request model before translation.
    #[serde(default)]
    pub model_redirects: HashMap<String, String>,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "OffsetDateTime::now_utc", with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

fn default_enabled() -> bool {
    true
}

impl Provider {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn redirect_model(&self, model: &str) -> Option<&str> {
        self.model_redirects.get(model).map(String::as_str)
    }

    /// USD cost of a token count under this provider's price, if priced.
    pub fn cost_usd(&self, total_tokens: u64) -> Option<f64> {
        self.cost_per_mtok
            .map(|per_mtok| per_mtok * total_tokens as f64 / 1_000_000.0)
    }
}
