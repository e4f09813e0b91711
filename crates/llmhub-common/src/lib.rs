use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: defaults, then config file, then ENV, then CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Path to the provider/user registry file loaded at startup.
    pub registry_path: String,
    /// Sticky-session affinity lifetime, seconds.
    pub sticky_ttl_secs: u64,
    /// Words that block a request body outright.
    pub sensitive_words: Vec<String>,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
    pub registry_path: Option<String>,
    pub sticky_ttl_secs: Option<u64>,
    pub sensitive_words: Option<Vec<String>>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.registry_path.is_some() {
            self.registry_path = other.registry_path;
        }
        if other.sticky_ttl_secs.is_some() {
            self.sticky_ttl_secs = other.sticky_ttl_secs;
        }
        if other.sensitive_words.is_some() {
            self.sensitive_words = other.sensitive_words;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8790),
            proxy: self.proxy,
            registry_path: self
                .registry_path
                .ok_or(GlobalConfigError::MissingField("registry_path"))?,
            sticky_ttl_secs: self.sticky_ttl_secs.unwrap_or(3600),
            sensitive_words: self.sensitive_words.unwrap_or_default(),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy: value.proxy,
            registry_path: Some(value.registry_path),
            sticky_ttl_secs: Some(value.sticky_ttl_secs),
            sensitive_words: Some(value.sensitive_words),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_layers() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            registry_path: Some("registry.json".to_string()),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9100),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9100);
    }

    #[test]
    fn registry_path_is_required() {
        let err = GlobalConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, GlobalConfigError::MissingField("registry_path")));
    }
}
