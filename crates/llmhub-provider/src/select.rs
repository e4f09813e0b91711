use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::circuit::CircuitBreakerRegistry;
use crate::decision::DecisionReason;
use crate::limits::RateLimitGuard;
use crate::provider::{Provider, ProviderType};
use crate::repo::ProviderRepository;
use crate::sticky::StickySessions;

/// Provider families able to serve a model, by model-name prefix.
pub fn route_family(model: &str) -> &'static [ProviderType] {
    if model.starts_with("claude-") {
        return &[ProviderType::Claude];
    }
    if model.starts_with("gpt-5-codex") || model.starts_with("codex-") {
        return &[ProviderType::Codex, ProviderType::OpenAiCompatible];
    }
    if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4") {
        return &[ProviderType::OpenAiCompatible, ProviderType::Codex];
    }
    if model.starts_with("gemini-") {
        return &[ProviderType::GeminiCli, ProviderType::OpenAiCompatible];
    }
    &[
        ProviderType::OpenAiCompatible,
        ProviderType::Claude,
        ProviderType::Codex,
        ProviderType::GeminiCli,
    ]
}

/// Outcome of one pick: the provider plus how it was chosen.
#[derive(Debug, Clone)]
pub struct Selection {
    pub provider: Provider,
    pub reason: DecisionReason,
}

/// Filters the provider table down to what may serve this request and picks
/// one: sticky affinity first, then a weighted draw inside the best
/// priority band.
#[derive(Clone)]
pub struct ProviderSelector {
    repo: Arc<dyn ProviderRepository>,
    circuit: Arc<CircuitBreakerRegistry>,
    guard: RateLimitGuard,
    sticky: Arc<StickySessions>,
}

impl ProviderSelector {
    pub fn new(
        repo: Arc<dyn ProviderRepository>,
        circuit: Arc<CircuitBreakerRegistry>,
        guard: RateLimitGuard,
        sticky: Arc<StickySessions>,
    ) -> Self {
        Self {
            repo,
            circuit,
            guard,
            sticky,
        }
    }

    pub async fn pick(
        &self,
        model: &str,
        session_id: Option<&str>,
        exclude: &HashSet<i64>,
    ) -> Option<Selection> {
        // StdRng rather than the thread-local one: the draw sits between
        // awaits, and the future must stay Send.
        let mut rng = StdRng::from_os_rng();
        self.pick_with_rng(model, session_id, exclude, &mut rng)
            .await
    }

    /// Deterministic under a seeded RNG for a fixed eligible set.
    pub async fn pick_with_rng<R: Rng>(
        &self,
        model: &str,
        session_id: Option<&str>,
        exclude: &HashSet<i64>,
        rng: &mut R,
    ) -> Option<Selection> {
        let family = route_family(model);
        let mut eligible = Vec::new();
        for provider in self.repo.list_enabled().await {
            if !family.contains(&provider.provider_type) {
                continue;
            }
            if exclude.contains(&provider.id) {
                continue;
            }
            // The open check is read-only; the half-open probe slot is only
            // claimed for the provider actually returned.
            if self.circuit.state(provider.id).await == crate::circuit::CircuitState::Open {
                continue;
            }
            if self.guard.check(&provider).await.is_err() {
                continue;
            }
            eligible.push(provider);
        }

        if let Some(session_id) = session_id
            && let Some(pinned) = self.sticky.get(session_id).await
            && let Some(provider) = eligible.iter().find(|provider| provider.id == pinned)
            && self.circuit.admit(provider.id).await
        {
            return Some(Selection {
                provider: provider.clone(),
                reason: DecisionReason::Sticky,
            });
        }

        while !eligible.is_empty() {
            let best_priority = eligible
                .iter()
                .map(|provider| provider.priority)
                .min()
                .expect("eligible set is non-empty");
            let band_indexes: Vec<usize> = eligible
                .iter()
                .enumerate()
                .filter(|(_, provider)| provider.priority == best_priority)
                .map(|(index, _)| index)
                .collect();
            let weights: Vec<u32> = band_indexes
                .iter()
                .map(|index| eligible[*index].weight)
                .collect();
            let chosen = band_indexes[pick_weighted_index(&weights, rng)];
            let provider = eligible.swap_remove(chosen);

            if !self.circuit.admit(provider.id).await {
                continue;
            }

            if let Some(session_id) = session_id {
                self.sticky.assign(session_id, provider.id).await;
            }
            return Some(Selection {
                provider,
                reason: DecisionReason::Selected,
            });
        }
        None
    }
}

/// Weighted draw. A provider with weight 0 never wins unless the whole band
/// is zero-weighted, in which case the draw is uniform.
fn pick_weighted_index<R: Rng>(weights: &[u32], rng: &mut R) -> usize {
    if weights.is_empty() {
        return 0;
    }

    let total: u64 = weights.iter().map(|weight| *weight as u64).sum();
    if total == 0 {
        return rng.random_range(0..weights.len());
    }

    let mut roll = rng.random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        let weight = *weight as u64;
        if roll < weight {
            return index;
        }
        roll -= weight;
    }

    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ConcurrencyTracker, UsageLedger};
    use crate::repo::MemoryProviderRepository;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn provider(id: i64, priority: i32, weight: u32, provider_type: ProviderType) -> Provider {
        Provider {
            id,
            name: format!("p{id}"),
            base_url: "https://api.example.com".to_string(),
            api_key: "k".to_string(),
            provider_type,
            enabled: true,
            weight,
            priority,
            cost_per_mtok: None,
            group_tag: None,
            limit_5h_usd: None,
            limit_weekly_usd: None,
            limit_monthly_usd: None,
            limit_concurrent_sessions: None,
            tpm: None,
            rpm: None,
            rpd: None,
            cc: None,
            model_redirects: HashMap::new(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        }
    }

    fn selector(providers: Vec<Provider>) -> ProviderSelector {
        let ledger = Arc::new(UsageLedger::new());
        let concurrency = Arc::new(ConcurrencyTracker::new());
        ProviderSelector::new(
            Arc::new(MemoryProviderRepository::new(providers)),
            Arc::new(CircuitBreakerRegistry::new()),
            RateLimitGuard::new(ledger, concurrency),
            Arc::new(StickySessions::new(Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn excluded_providers_are_never_returned() {
        let selector = selector(vec![
            provider(1, 0, 10, ProviderType::OpenAiCompatible),
            provider(2, 0, 10, ProviderType::OpenAiCompatible),
        ]);
        let exclude: HashSet<i64> = [1].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let picked = selector
                .pick_with_rng("gpt-4.1", None, &exclude, &mut rng)
                .await
                .unwrap();
            assert_eq!(picked.provider.id, 2);
        }
    }

    #[tokio::test]
    async fn lower_priority_band_wins_regardless_of_weight() {
        let selector = selector(vec![
            provider(1, 1, 1, ProviderType::OpenAiCompatible),
            provider(2, 2, 1000, ProviderType::OpenAiCompatible),
        ]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let picked = selector
                .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
                .await
                .unwrap();
            assert_eq!(picked.provider.id, 1);
        }
    }

    #[tokio::test]
    async fn sticky_assignment_repeats_while_eligible() {
        let selector = selector(vec![
            provider(1, 0, 1, ProviderType::OpenAiCompatible),
            provider(2, 0, 1, ProviderType::OpenAiCompatible),
        ]);
        let mut rng = StdRng::seed_from_u64(11);
        let first = selector
            .pick_with_rng("gpt-4.1", Some("session-a"), &HashSet::new(), &mut rng)
            .await
            .unwrap();
        for _ in 0..10 {
            let next = selector
                .pick_with_rng("gpt-4.1", Some("session-a"), &HashSet::new(), &mut rng)
                .await
                .unwrap();
            assert_eq!(next.provider.id, first.provider.id);
            assert_eq!(next.reason, DecisionReason::Sticky);
        }
    }

    #[tokio::test]
    async fn route_family_filters_incompatible_types() {
        let selector = selector(vec![
            provider(1, 0, 1, ProviderType::Claude),
            provider(2, 0, 1, ProviderType::Codex),
        ]);
        let mut rng = StdRng::seed_from_u64(5);
        let picked = selector
            .pick_with_rng("claude-sonnet-4", None, &HashSet::new(), &mut rng)
            .await
            .unwrap();
        assert_eq!(picked.provider.id, 1);
    }

    #[tokio::test]
    async fn zero_weight_band_draws_uniformly() {
        let selector = selector(vec![
            provider(1, 0, 0, ProviderType::OpenAiCompatible),
            provider(2, 0, 0, ProviderType::OpenAiCompatible),
        ]);
        let mut rng = StdRng::seed_from_u64(2);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let picked = selector
                .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
                .await
                .unwrap();
            seen.insert(picked.provider.id);
        }
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn open_circuit_removes_provider_from_pool() {
        let ledger = Arc::new(UsageLedger::new());
        let circuit = Arc::new(CircuitBreakerRegistry::new());
        let selector = ProviderSelector::new(
            Arc::new(MemoryProviderRepository::new(vec![
                provider(1, 0, 1, ProviderType::OpenAiCompatible),
                provider(2, 0, 1, ProviderType::OpenAiCompatible),
            ])),
            circuit.clone(),
            RateLimitGuard::new(ledger, Arc::new(ConcurrencyTracker::new())),
            Arc::new(StickySessions::new(Duration::from_secs(60))),
        );
        for _ in 0..5 {
            circuit.record_failure(1).await;
        }
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..10 {
            let picked = selector
                .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
                .await
                .unwrap();
            assert_eq!(picked.provider.id, 2);
        }
    }
}
