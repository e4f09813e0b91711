use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use llmhub_protocol::TokenUsage;

use crate::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageWindow {
    Minute,
    Hour,
    Day,
    FiveHour,
    Week,
    Month,
}

impl UsageWindow {
    pub const ALL: [UsageWindow; 6] = [
        UsageWindow::Minute,
        UsageWindow::Hour,
        UsageWindow::Day,
        UsageWindow::FiveHour,
        UsageWindow::Week,
        UsageWindow::Month,
    ];

    pub fn length(&self) -> Duration {
        match self {
            UsageWindow::Minute => Duration::from_secs(60),
            UsageWindow::Hour => Duration::from_secs(60 * 60),
            UsageWindow::Day => Duration::from_secs(24 * 60 * 60),
            UsageWindow::FiveHour => Duration::from_secs(5 * 60 * 60),
            UsageWindow::Week => Duration::from_secs(7 * 24 * 60 * 60),
            UsageWindow::Month => Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowTotals {
    pub tokens: u64,
    pub requests: u64,
    pub usd: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowCell {
    window_start: u64,
    tokens: u64,
    requests: u64,
    usd: f64,
}

/// Rolling per-(provider, window) usage. Cells reset lazily when their
/// window has rolled over; reads are best-effort.
#[derive(Debug, Default)]
pub struct UsageLedger {
    cells: Mutex<HashMap<(i64, UsageWindow), WindowCell>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, provider_id: i64, usage: TokenUsage, usd: f64) {
        let now = unix_now();
        let mut cells = self.cells.lock().await;
        for window in UsageWindow::ALL {
            let cell = cells.entry((provider_id, window)).or_default();
            refresh(cell, window, now);
            cell.tokens += usage.total();
            cell.requests += 1;
            cell.usd += usd;
        }
    }

    pub async fn totals(&self, provider_id: i64, window: UsageWindow) -> WindowTotals {
        let now = unix_now();
        let mut cells = self.cells.lock().await;
        let cell = cells.entry((provider_id, window)).or_default();
        refresh(cell, window, now);
        WindowTotals {
            tokens: cell.tokens,
            requests: cell.requests,
            usd: cell.usd,
        }
    }
}

fn refresh(cell: &mut WindowCell, window: UsageWindow, now: u64) {
    let len = window.length().as_secs();
    let start = now - (now % len);
    if cell.window_start != start {
        *cell = WindowCell {
            window_start: start,
            ..WindowCell::default()
        };
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    Tpm,
    Rpm,
    Rpd,
    Budget5h,
    BudgetWeekly,
    BudgetMonthly,
    ConcurrentSessions,
    ConcurrentCalls,
}

impl std::fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self {
            LimitExceeded::Tpm => "tokens-per-minute",
            LimitExceeded::Rpm => "requests-per-minute",
            LimitExceeded::Rpd => "requests-per-day",
            LimitExceeded::Budget5h => "5h budget",
            LimitExceeded::BudgetWeekly => "weekly budget",
            LimitExceeded::BudgetMonthly => "monthly budget",
            LimitExceeded::ConcurrentSessions => "concurrent sessions",
            LimitExceeded::ConcurrentCalls => "concurrent calls",
        };
        write!(f, "{what} limit reached")
    }
}

/// In-flight call accounting. Permits release on drop so every exit path of
/// a request gives the slot back.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    counts: Mutex<HashMap<i64, Arc<AtomicU32>>>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, provider_id: i64) -> ConcurrencyPermit {
        let count = {
            let mut counts = self.counts.lock().await;
            counts.entry(provider_id).or_default().clone()
        };
        count.fetch_add(1, Ordering::SeqCst);
        ConcurrencyPermit { count }
    }

    pub async fn current(&self, provider_id: i64) -> u32 {
        let counts = self.counts.lock().await;
        counts
            .get(&provider_id)
            .map(|count| count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct ConcurrencyPermit {
    count: Arc<AtomicU32>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Checks every active ceiling for a provider before it can be selected.
#[derive(Clone)]
pub struct RateLimitGuard {
    ledger: Arc<UsageLedger>,
    concurrency: Arc<ConcurrencyTracker>,
}

impl RateLimitGuard {
    pub fn new(ledger: Arc<UsageLedger>, concurrency: Arc<ConcurrencyTracker>) -> Self {
        Self {
            ledger,
            concurrency,
        }
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyTracker> {
        &self.concurrency
    }

    pub async fn check(&self, provider: &Provider) -> Result<(), LimitExceeded> {
        let minute = self.ledger.totals(provider.id, UsageWindow::Minute).await;
        if let Some(tpm) = provider.tpm
            && minute.tokens >= tpm
        {
            return Err(LimitExceeded::Tpm);
        }
        if let Some(rpm) = provider.rpm
            && minute.requests >= rpm
        {
            return Err(LimitExceeded::Rpm);
        }
        if let Some(rpd) = provider.rpd {
            let day = self.ledger.totals(provider.id, UsageWindow::Day).await;
            if day.requests >= rpd {
                return Err(LimitExceeded::Rpd);
            }
        }
        if let Some(budget) = provider.limit_5h_usd {
            let totals = self.ledger.totals(provider.id, UsageWindow::FiveHour).await;
            if totals.usd >= budget {
                return Err(LimitExceeded::Budget5h);
            }
        }
        if let Some(budget) = provider.limit_weekly_usd {
            let totals = self.ledger.totals(provider.id, UsageWindow::Week).await;
            if totals.usd >= budget {
                return Err(LimitExceeded::BudgetWeekly);
            }
        }
        if let Some(budget) = provider.limit_monthly_usd {
            let totals = self.ledger.totals(provider.id, UsageWindow::Month).await;
            if totals.usd >= budget {
                return Err(LimitExceeded::BudgetMonthly);
            }
        }

        let in_flight = self.concurrency.current(provider.id).await;
        if let Some(limit) = provider.limit_concurrent_sessions
            && in_flight >= limit
        {
            return Err(LimitExceeded::ConcurrentSessions);
        }
        if let Some(cc) = provider.cc
            && in_flight >= cc
        {
            return Err(LimitExceeded::ConcurrentCalls);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;
    use time::OffsetDateTime;

    fn provider(rpm: Option<u64>) -> Provider {
        Provider {
            id: 1,
            name: "p".to_string(),
            base_url: "https://api.example.com".to_string(),
            api_key: "k".to_string(),
            provider_type: ProviderType::OpenAiCompatible,
            enabled: true,
            weight: 1,
            priority: 0,
            cost_per_mtok: None,
            group_tag: None,
            limit_5h_usd: None,
            limit_weekly_usd: None,
            limit_monthly_usd: None,
            limit_concurrent_sessions: None,
            tpm: None,
            rpm,
            rpd: None,
            cc: None,
            model_redirects: HashMap::new(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn rpm_ceiling_blocks_after_enough_requests() {
        let ledger = Arc::new(UsageLedger::new());
        let guard = RateLimitGuard::new(ledger.clone(), Arc::new(ConcurrencyTracker::new()));
        let provider = provider(Some(2));

        assert!(guard.check(&provider).await.is_ok());
        ledger.record(1, TokenUsage::default(), 0.0).await;
        ledger.record(1, TokenUsage::default(), 0.0).await;
        assert_eq!(guard.check(&provider).await, Err(LimitExceeded::Rpm));
    }

    #[tokio::test]
    async fn concurrency_permit_releases_on_drop() {
        let tracker = Arc::new(ConcurrencyTracker::new());
        let permit = tracker.acquire(9).await;
        assert_eq!(tracker.current(9).await, 1);
        drop(permit);
        assert_eq!(tracker.current(9).await, 0);
    }

    #[tokio::test]
    async fn budget_ceiling_blocks_spend() {
        let ledger = Arc::new(UsageLedger::new());
        let guard = RateLimitGuard::new(ledger.clone(), Arc::new(ConcurrencyTracker::new()));
        let mut provider = provider(None);
        provider.limit_5h_usd = Some(1.0);

        ledger
            .record(1, TokenUsage { input_tokens: 100, output_tokens: 50 }, 1.25)
            .await;
        assert_eq!(guard.check(&provider).await, Err(LimitExceeded::Budget5h));
    }
}
