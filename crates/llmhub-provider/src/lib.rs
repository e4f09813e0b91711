pub mod circuit;
pub mod collab;
pub mod decision;
pub mod limits;
pub mod provider;
pub mod repo;
pub mod select;
pub mod sticky;

pub use circuit::{CircuitBreakerRegistry, CircuitConfig, CircuitState};
pub use collab::{
    AuthError, AuthN, MemoryAuth, NoopStatisticsSink, PriceBook, Principal, RequestStats,
    SensitiveWordGuard, StaticPriceBook, StatisticsSink, WordListGuard,
};
pub use decision::{DecisionEntry, DecisionReason};
pub use limits::{
    ConcurrencyPermit, ConcurrencyTracker, LimitExceeded, RateLimitGuard, UsageLedger, UsageWindow,
    WindowTotals,
};
pub use provider::{Provider, ProviderType};
pub use repo::{MemoryProviderRepository, ProviderRepository};
pub use select::{ProviderSelector, Selection, route_family};
pub use sticky::StickySessions;
