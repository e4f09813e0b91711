use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use llmhub_common::GlobalConfigPatch;
use llmhub_core::{AppState, UpstreamClientConfig, WreqUpstreamClient};
use llmhub_provider::{
    MemoryAuth, MemoryProviderRepository, Provider, RequestStats, StaticPriceBook, StatisticsSink,
    WordListGuard,
};

#[derive(Debug, Parser)]
#[command(name = "llmhub", about = "Multi-upstream LLM relay proxy")]
struct Args {
    #[arg(long, env = "LLMHUB_HOST")]
    host: Option<String>,
    #[arg(long, env = "LLMHUB_PORT")]
    port: Option<u16>,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "LLMHUB_PROXY")]
    proxy: Option<String>,
    /// Provider/user registry JSON file.
    #[arg(long, env = "LLMHUB_REGISTRY")]
    registry: Option<String>,
    #[arg(long, env = "LLMHUB_STICKY_TTL_SECS")]
    sticky_ttl_secs: Option<u64>,
}

/// Registry file: providers, user keys, and the optional word/price tables.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    providers: Vec<Provider>,
    #[serde(default)]
    user_keys: Vec<UserKeyRecord>,
    #[serde(default)]
    sensitive_words: Vec<String>,
    #[serde(default)]
    prices: Vec<PriceRecord>,
}

#[derive(Debug, Deserialize)]
struct UserKeyRecord {
    api_key: String,
    user_id: i64,
    key_id: i64,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct PriceRecord {
    model_prefix: String,
    usd_per_mtok: f64,
}

/// Default statistics sink: structured log lines, one per finished call.
struct LogStatisticsSink;

impl StatisticsSink for LogStatisticsSink {
    fn record(&self, stats: RequestStats) {
        info!(
            user_id = stats.user_id,
            provider = %stats.provider_name,
            provider_id = stats.provider_id,
            model = %stats.model,
            tokens_in = stats.tokens_in,
            tokens_out = stats.tokens_out,
            latency_ms = stats.latency_ms,
            status = stats.status,
            attempts = stats.attempts,
            "request finished"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut patch = GlobalConfigPatch::default();
    patch.overlay(GlobalConfigPatch {
        host: args.host,
        port: args.port,
        proxy: args.proxy,
        registry_path: args.registry,
        sticky_ttl_secs: args.sticky_ttl_secs,
        sensitive_words: None,
    });
    let mut config = patch.into_config()?;

    let registry = load_registry(&config.registry_path)?;
    if !registry.sensitive_words.is_empty() {
        config.sensitive_words = registry.sensitive_words.clone();
    }

    let mut auth = MemoryAuth::new();
    for key in &registry.user_keys {
        auth.insert(&key.api_key, key.user_id, key.key_id, key.enabled);
    }
    let prices = StaticPriceBook::new(
        registry
            .prices
            .iter()
            .map(|price| (price.model_prefix.clone(), price.usd_per_mtok))
            .collect(),
    );

    let client_config = UpstreamClientConfig {
        proxy: config.proxy.clone(),
        ..UpstreamClientConfig::default()
    };
    let proxy = config.proxy.clone();
    let client = WreqUpstreamClient::with_proxy_resolver(client_config, move || proxy.clone())?;

    let words = WordListGuard::new(config.sensitive_words.clone());
    let bind = format!("{}:{}", config.host, config.port);
    let provider_count = registry.providers.len();

    let state = Arc::new(AppState::new(
        config,
        Arc::new(MemoryProviderRepository::new(registry.providers)),
        Arc::new(client),
        Arc::new(auth),
        Arc::new(words),
        Arc::new(prices),
        Arc::new(LogStatisticsSink),
    ));

    let app = llmhub_router::proxy_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, providers = provider_count, "llmhub listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_registry(path: &str) -> Result<RegistryFile> {
    let raw = std::fs::read(path).with_context(|| format!("read registry file {path}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse registry file {path}"))
}
