use std::collections::HashMap;

use async_trait::async_trait;

/// Authenticated caller of the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub key_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing api key")]
    MissingKey,
    #[error("unknown or disabled api key")]
    Unauthorized,
}

/// End-user API-key authentication, backed elsewhere; the core only needs
/// the lookup.
#[async_trait]
pub trait AuthN: Send + Sync {
    async fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, AuthError>;
}

struct KeyEntry {
    user_id: i64,
    key_id: i64,
    enabled: bool,
}

/// In-memory key store. Keys are held as blake3 hashes so a process dump
/// never exposes a usable credential.
#[derive(Default)]
pub struct MemoryAuth {
    keys: HashMap<blake3::Hash, KeyEntry>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, api_key: &str, user_id: i64, key_id: i64, enabled: bool) {
        self.keys.insert(
            blake3::hash(api_key.as_bytes()),
            KeyEntry {
                user_id,
                key_id,
                enabled,
            },
        );
    }
}

#[async_trait]
impl AuthN for MemoryAuth {
    async fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, AuthError> {
        let api_key = api_key.ok_or(AuthError::MissingKey)?;
        let entry = self
            .keys
            .get(&blake3::hash(api_key.as_bytes()))
            .filter(|entry| entry.enabled)
            .ok_or(AuthError::Unauthorized)?;
        Ok(Principal {
            user_id: entry.user_id,
            key_id: entry.key_id,
        })
    }
}

/// Boolean guard over the request body text.
pub trait SensitiveWordGuard: Send + Sync {
    /// Err carries the matched word for the refusal message.
    fn check(&self, body_text: &str) -> Result<(), String>;
}

/// Case-insensitive substring scan over a configured word list.
#[derive(Default)]
pub struct WordListGuard {
    words: Vec<String>,
}

impl WordListGuard {
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(|word| word.to_lowercase())
                .filter(|word| !word.is_empty())
                .collect(),
        }
    }
}

impl SensitiveWordGuard for WordListGuard {
    fn check(&self, body_text: &str) -> Result<(), String> {
        if self.words.is_empty() {
            return Ok(());
        }
        let haystack = body_text.to_lowercase();
        for word in &self.words {
            if haystack.contains(word) {
                return Err(word.clone());
            }
        }
        Ok(())
    }
}

/// USD per million tokens for a model, when known.
pub trait PriceBook: Send + Sync {
    fn lookup(&self, model: &str) -> Option<f64>;
}

/// Longest-prefix match over a static table.
#[derive(Default)]
pub struct StaticPriceBook {
    prices: Vec<(String, f64)>,
}

impl StaticPriceBook {
    pub fn new(mut prices: Vec<(String, f64)>) -> Self {
        prices.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { prices }
    }
}

impl PriceBook for StaticPriceBook {
    fn lookup(&self, model: &str) -> Option<f64> {
        self.prices
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, price)| *price)
    }
}

/// One finished request, for the statistics pipeline.
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub user_id: i64,
    pub provider_id: i64,
    pub provider_name: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
    pub status: u16,
    pub attempts: u32,
}

pub trait StatisticsSink: Send + Sync {
    fn record(&self, stats: RequestStats);
}

pub struct NoopStatisticsSink;

impl StatisticsSink for NoopStatisticsSink {
    fn record(&self, _stats: RequestStats) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auth_rejects_unknown_and_disabled_keys() {
        let mut auth = MemoryAuth::new();
        auth.insert("sk-good", 1, 10, true);
        auth.insert("sk-off", 2, 20, false);

        let principal = auth.authenticate(Some("sk-good")).await.unwrap();
        assert_eq!(principal, Principal { user_id: 1, key_id: 10 });
        assert!(matches!(
            auth.authenticate(Some("sk-off")).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            auth.authenticate(None).await,
            Err(AuthError::MissingKey)
        ));
    }

    #[test]
    fn word_guard_matches_case_insensitively() {
        let guard = WordListGuard::new(vec!["Forbidden".to_string()]);
        assert!(guard.check("nothing to see").is_ok());
        assert_eq!(
            guard.check("this is FORBIDDEN content"),
            Err("forbidden".to_string())
        );
    }

    #[test]
    fn price_book_prefers_longest_prefix() {
        let book = StaticPriceBook::new(vec![
            ("gpt-".to_string(), 2.0),
            ("gpt-5-codex".to_string(), 9.0),
        ]);
        assert_eq!(book.lookup("gpt-5-codex"), Some(9.0));
        assert_eq!(book.lookup("gpt-4.1"), Some(2.0));
        assert_eq!(book.lookup("claude-sonnet-4"), None);
    }
}
