use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry {
    body: String,
    expires_at: Instant,
}

/// Process-wide response cache for rendered feed snapshots.
///
/// Values live for a fixed TTL; a read inside the window returns the
/// stored snapshot even when the underlying rows have changed since.
/// Expired entries are dropped lazily on read. `flush` empties the whole
/// store, forcing the next read to recompute.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.body.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but is stale; drop it
        self.entries.write().await.remove(key);
        None
    }

    pub async fn insert(&self, key: String, body: String) {
        let entry = Entry {
            body,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    pub async fn flush(&self) {
        self.entries.write().await.clear();
    }
}
