use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct StickyEntry {
    provider_id: i64,
    expires_at: Instant,
}

/// Session-id -> provider affinity. Entries expire after the TTL and are
/// evicted lazily on access plus a sweep once the map grows.
#[derive(Debug)]
pub struct StickySessions {
    ttl: Duration,
    entries: Mutex<HashMap<String, StickyEntry>>,
}

const SWEEP_THRESHOLD: usize = 4096;

impl StickySessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<i64> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(session_id).copied()?;
        if entry.expires_at <= Instant::now() {
            entries.remove(session_id);
            return None;
        }
        Some(entry.provider_id)
    }

    /// Assign (or refresh) the affinity for a session.
    pub async fn assign(&self, session_id: &str, provider_id: i64) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        entries.insert(
            session_id.to_string(),
            StickyEntry {
                provider_id,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop the affinity, e.g. after the pinned provider failed.
    pub async fn unassign(&self, session_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn affinity_survives_within_ttl() {
        let sticky = StickySessions::new(Duration::from_secs(60));
        sticky.assign("s1", 42).await;
        assert_eq!(sticky.get("s1").await, Some(42));
    }

    #[tokio::test]
    async fn affinity_expires_after_ttl() {
        let sticky = StickySessions::new(Duration::from_millis(20));
        sticky.assign("s1", 42).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sticky.get("s1").await, None);
    }

    #[tokio::test]
    async fn unassign_clears_affinity() {
        let sticky = StickySessions::new(Duration::from_secs(60));
        sticky.assign("s1", 42).await;
        sticky.unassign("s1").await;
        assert_eq!(sticky.get("s1").await, None);
    }
}
