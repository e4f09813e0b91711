use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use llmhub_common::GlobalConfig;
use llmhub_provider::{
    AuthN, CircuitBreakerRegistry, ConcurrencyTracker, PriceBook, ProviderRepository,
    ProviderSelector, RateLimitGuard, SensitiveWordGuard, StatisticsSink, StickySessions,
    UsageLedger,
};

use crate::upstream::UpstreamClient;

/// Process-wide state shared by every concurrent session. Collaborators sit
/// behind trait objects so tests (and other deployments) swap them freely.
pub struct AppState {
    pub config: ArcSwap<GlobalConfig>,
    pub repo: Arc<dyn ProviderRepository>,
    pub circuit: Arc<CircuitBreakerRegistry>,
    pub ledger: Arc<UsageLedger>,
    pub concurrency: Arc<ConcurrencyTracker>,
    pub sticky: Arc<StickySessions>,
    pub guard: RateLimitGuard,
    pub selector: ProviderSelector,
    pub auth: Arc<dyn AuthN>,
    pub words: Arc<dyn SensitiveWordGuard>,
    pub prices: Arc<dyn PriceBook>,
    pub stats: Arc<dyn StatisticsSink>,
    pub client: Arc<dyn UpstreamClient>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GlobalConfig,
        repo: Arc<dyn ProviderRepository>,
        client: Arc<dyn UpstreamClient>,
        auth: Arc<dyn AuthN>,
        words: Arc<dyn SensitiveWordGuard>,
        prices: Arc<dyn PriceBook>,
        stats: Arc<dyn StatisticsSink>,
    ) -> Self {
        let circuit = Arc::new(CircuitBreakerRegistry::new());
        let ledger = Arc::new(UsageLedger::new());
        let concurrency = Arc::new(ConcurrencyTracker::new());
        let sticky = Arc::new(StickySessions::new(Duration::from_secs(
            config.sticky_ttl_secs,
        )));
        let guard = RateLimitGuard::new(ledger.clone(), concurrency.clone());
        let selector = ProviderSelector::new(
            repo.clone(),
            circuit.clone(),
            guard.clone(),
            sticky.clone(),
        );
        Self {
            config: ArcSwap::from_pointee(config),
            repo,
            circuit,
            ledger,
            concurrency,
            sticky,
            guard,
            selector,
            auth,
            words,
            prices,
            stats,
            client,
        }
    }

    /// 429 only when the model has providers at all and every one of them
    /// is currently over a ceiling; an empty family stays a selector miss.
    pub async fn check_rate_limits(&self, model: &str) -> Result<(), crate::error::RelayError> {
        let family = llmhub_provider::route_family(model);
        let mut any = false;
        for provider in self.repo.list_enabled().await {
            if !family.contains(&provider.provider_type) {
                continue;
            }
            any = true;
            if self.guard.check(&provider).await.is_ok() {
                return Ok(());
            }
        }
        if any {
            Err(crate::error::RelayError::RateLimited(
                "all providers for this model are rate limited".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// USD cost of a finished call: the provider's own price wins, then the
    /// price book, else free.
    pub fn cost_usd(&self, provider_price: Option<f64>, model: &str, total_tokens: u64) -> f64 {
        let per_mtok = provider_price.or_else(|| self.prices.lookup(model));
        per_mtok
            .map(|price| price * total_tokens as f64 / 1_000_000.0)
            .unwrap_or(0.0)
    }
}
