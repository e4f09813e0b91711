use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use time::OffsetDateTime;

use llmhub_provider::{
    CircuitBreakerRegistry, CircuitConfig, CircuitState, ConcurrencyTracker,
    MemoryProviderRepository, Provider, ProviderSelector, ProviderType, RateLimitGuard,
    StickySessions, UsageLedger,
};

fn provider(id: i64) -> Provider {
    Provider {
        id,
        name: format!("p{id}"),
        base_url: "https://api.example.com".to_string(),
        api_key: "k".to_string(),
        provider_type: ProviderType::OpenAiCompatible,
        enabled: true,
        weight: 5,
        priority: 0,
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

#[tokio::test]
async fn tripped_provider_recovers_through_probe_and_rejoins_the_pool() {
    let circuit = Arc::new(CircuitBreakerRegistry::with_config(CircuitConfig {
        failure_threshold: 2,
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_millis(400),
    }));
    let selector = ProviderSelector::new(
        Arc::new(MemoryProviderRepository::new(vec![provider(1)])),
        circuit.clone(),
        RateLimitGuard::new(Arc::new(UsageLedger::new()), Arc::new(ConcurrencyTracker::new())),
        Arc::new(StickySessions::new(Duration::from_secs(60))),
    );
    let mut rng = StdRng::seed_from_u64(1);

    circuit.record_failure(1).await;
    circuit.record_failure(1).await;
    assert_eq!(circuit.state(1).await, CircuitState::Open);

    // While open, the only provider is unpickable.
    assert!(
        selector
            .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
            .await
            .is_none()
    );

    // After the backoff the breaker half-opens and yields the probe.
    tokio::time::sleep(Duration::from_millis(70)).await;
    let probe = selector
        .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
        .await
        .expect("half-open admits a probe");
    assert_eq!(probe.provider.id, 1);

    // A concurrent request during the probe is shut out.
    assert!(
        selector
            .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
            .await
            .is_none()
    );

    circuit.record_success(1).await;
    assert_eq!(circuit.state(1).await, CircuitState::Closed);
    assert!(
        selector
            .pick_with_rng("gpt-4.1", None, &HashSet::new(), &mut rng)
            .await
            .is_some()
    );
}
