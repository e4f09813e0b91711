use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Observable health of one provider's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half-open",
            CircuitState::Open => "open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_started: Option<Instant> },
}

#[derive(Debug)]
struct CircuitEntry {
    phase: Phase,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            phase: Phase::Closed,
            failure_count: 0,
            last_failure_at: None,
        }
    }

    /// Open-until expiry flips the entry to half-open; every read path goes
    /// through here first. A probe whose request vanished (client
    /// disconnect before any record) ages out so the slot cannot leak.
    fn settle(&mut self, now: Instant, probe_timeout: Duration) {
        if let Phase::Open { until } = self.phase
            && now >= until
        {
            self.phase = Phase::HalfOpen {
                probe_started: None,
            };
        }
        if let Phase::HalfOpen {
            probe_started: Some(started),
        } = self.phase
            && now.duration_since(started) >= probe_timeout
        {
            self.phase = Phase::HalfOpen {
                probe_started: None,
            };
        }
    }

    fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Per-provider circuit breakers. Every upstream non-2xx or transport error
/// counts as a failure so broken keys and exhausted accounts rotate off the
/// pool quickly; recovery is probed one request at a time.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitConfig,
    entries: Mutex<HashMap<i64, CircuitEntry>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::with_config(CircuitConfig::default())
    }

    pub fn with_config(config: CircuitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self, provider_id: i64) -> CircuitState {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&provider_id) else {
            return CircuitState::Closed;
        };
        entry.settle(Instant::now(), self.config.backoff_base);
        entry.state()
    }

    pub async fn open_until(&self, provider_id: i64) -> Option<Instant> {
        let entries = self.entries.lock().await;
        match entries.get(&provider_id).map(|entry| entry.phase) {
            Some(Phase::Open { until }) => Some(until),
            _ => None,
        }
    }

    pub async fn failure_count(&self, provider_id: i64) -> u32 {
        let entries = self.entries.lock().await;
        entries
            .get(&provider_id)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
    }

    /// Whether the provider may receive a request right now. Closed always
    /// admits; open never; half-open admits exactly one probe, and that
    /// admission claims the probe slot.
    pub async fn admit(&self, provider_id: i64) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(provider_id).or_insert_with(CircuitEntry::new);
        entry.settle(now, self.config.backoff_base);
        match &mut entry.phase {
            Phase::Closed => true,
            Phase::Open { .. } => false,
            Phase::HalfOpen { probe_started } => {
                if probe_started.is_some() {
                    false
                } else {
                    *probe_started = Some(now);
                    true
                }
            }
        }
    }

    pub async fn record_success(&self, provider_id: i64) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(provider_id).or_insert_with(CircuitEntry::new);
        entry.phase = Phase::Closed;
        entry.failure_count = 0;
    }

    pub async fn record_failure(&self, provider_id: i64) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(provider_id).or_insert_with(CircuitEntry::new);
        entry.settle(now, self.config.backoff_base);
        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure_at = Some(now);

        match entry.phase {
            Phase::Closed => {
                if entry.failure_count >= self.config.failure_threshold {
                    entry.phase = Phase::Open {
                        until: now + self.backoff(entry.failure_count),
                    };
                }
            }
            // A failed probe re-opens with a longer wait.
            Phase::HalfOpen { .. } | Phase::Open { .. } => {
                entry.phase = Phase::Open {
                    until: now + self.backoff(entry.failure_count),
                };
            }
        }
    }

    /// Capped exponential: base * 2^(failures - threshold).
    fn backoff(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(self.config.failure_threshold).min(31);
        let scaled = self
            .config
            .backoff_base
            .saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
        scaled.min(self.config.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 3,
            backoff_base: Duration::from_millis(40),
            backoff_max: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let registry = CircuitBreakerRegistry::with_config(fast_config());
        for _ in 0..2 {
            registry.record_failure(7).await;
        }
        assert_eq!(registry.state(7).await, CircuitState::Closed);
        registry.record_failure(7).await;
        assert_eq!(registry.state(7).await, CircuitState::Open);
        assert!(!registry.admit(7).await);
    }

    #[tokio::test]
    async fn half_open_admits_single_probe_then_closes_on_success() {
        let registry = CircuitBreakerRegistry::with_config(fast_config());
        for _ in 0..3 {
            registry.record_failure(1).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.state(1).await, CircuitState::HalfOpen);

        assert!(registry.admit(1).await);
        assert!(!registry.admit(1).await, "second probe must be rejected");

        registry.record_success(1).await;
        assert_eq!(registry.state(1).await, CircuitState::Closed);
        assert_eq!(registry.failure_count(1).await, 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens_with_longer_backoff() {
        let registry = CircuitBreakerRegistry::with_config(fast_config());
        for _ in 0..3 {
            registry.record_failure(2).await;
        }
        let first_until = registry.open_until(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.admit(2).await);
        registry.record_failure(2).await;

        assert_eq!(registry.state(2).await, CircuitState::Open);
        let second_until = registry.open_until(2).await.unwrap();
        assert!(second_until > first_until);
    }

    #[tokio::test]
    async fn success_resets_failure_count_in_closed() {
        let registry = CircuitBreakerRegistry::with_config(fast_config());
        registry.record_failure(3).await;
        registry.record_failure(3).await;
        registry.record_success(3).await;
        assert_eq!(registry.failure_count(3).await, 0);
        registry.record_failure(3).await;
        assert_eq!(registry.state(3).await, CircuitState::Closed);
    }
}
