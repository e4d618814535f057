//! One-time challenge cache.
//!
//! Ceremony state is parked here between the begin and finish steps. The
//! cache guarantees at-most-one redemption: `get_and_remove` performs the
//! lookup and the delete under a single lock, so two requests racing on the
//! same challenge id can never both succeed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default time-to-live for ceremony challenges.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

#[async_trait]
pub trait ChallengeCache: Send + Sync {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Duration);
    /// Atomic take: returns the value and deletes the entry in one step.
    /// Expired entries are treated as absent.
    async fn get_and_remove(&self, key: &str) -> Option<Vec<u8>>;
}

struct Entry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

/// In-memory cache; expired entries are pruned on insert and rejected on
/// take.
#[derive(Default)]
pub struct MemoryChallengeCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryChallengeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeCache for MemoryChallengeCache {
    async fn set(&self, key: String, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < entry.ttl);
        entries.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn get_and_remove(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.remove(key)?;
        if entry.created_at.elapsed() < entry.ttl {
            Some(entry.value)
        } else {
            None
        }
    }
}
