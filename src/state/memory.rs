//! Single-process, in-memory `State` implementation. This is the default
//! backend for tests and for a one-instance deployment; a Redis-backed
//! implementation of the same trait is out of scope (§1) but is a drop-in
//! given the trait above.

use super::{ClusterMessage, LockToken, State};
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::sleep;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct LockEntry {
    token: String,
    expires_at: Instant,
}

pub struct InMemoryState {
    kv: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    counters: Mutex<HashMap<String, u64>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    topics: Mutex<HashMap<String, broadcast::Sender<ClusterMessage>>>,
}

impl Default for InMemoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryState {
    pub fn new() -> Self {
        InMemoryState {
            kv: Mutex::new(HashMap::new()),
            sets: Mutex::new(HashMap::new()),
            hashes: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<ClusterMessage> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }
}

#[async_trait]
impl State for InMemoryState {
    async fn kv_get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.kv.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.kv
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn kv_del(&self, key: &str) -> ChatResult<()> {
        self.kv.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> ChatResult<()> {
        self.sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> ChatResult<()> {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> ChatResult<HashSet<String>> {
        Ok(self
            .sets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hash_get(&self, key: &str, field: &str) -> ChatResult<Option<String>> {
        Ok(self
            .hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> ChatResult<()> {
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> ChatResult<()> {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = hashes.get_mut(key) {
            h.remove(field);
            if h.is_empty() {
                hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn hash_keys(&self, key: &str) -> ChatResult<Vec<String>> {
        Ok(self
            .hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn incr(&self, key: &str) -> ChatResult<u64> {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn lock_acquire(&self, name: &str, ttl: Duration) -> ChatResult<LockToken> {
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + ttl.max(Duration::from_millis(50)) * 4;

        loop {
            {
                let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
                let free = match locks.get(name) {
                    Some(entry) => Instant::now() >= entry.expires_at,
                    None => true,
                };
                if free {
                    locks.insert(
                        name.to_string(),
                        LockEntry {
                            token: token.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                    return Ok(LockToken(token));
                }
            }
            if Instant::now() >= deadline {
                return Err(ChatError::server_error(format!(
                    "timed out acquiring lock '{name}'"
                )));
            }
            sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn lock_release(&self, name: &str, token: &LockToken) -> ChatResult<()> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = locks.get(name) {
            if entry.token == token.0 {
                locks.remove(name);
            }
            // Token mismatch (lock expired and was stolen) or already
            // released: treat as a no-op, per §5.
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, message: ClusterMessage) -> ChatResult<()> {
        let _ = self.topic_sender(topic).send(message);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<ClusterMessage> {
        self.topic_sender(topic).subscribe()
    }
}
