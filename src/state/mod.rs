//! State store contract (C2, §6): durable/shared key-value and set
//! operations with distributed locks and pub/sub, plus factories for the
//! `UserState`/`RoomState` projections.
//!
//! Concrete backing implementations (a Redis client, in particular) are out
//! of scope for this crate beyond the trait itself. [`memory::InMemoryState`]
//! is the single-process reference implementation used by tests and by a
//! single-instance deployment.

mod memory;

pub use memory::InMemoryState;

use crate::error::ChatResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Opaque proof of lock ownership, returned by [`State::lock_acquire`] and
/// required to release the same lock. Implementations that talk to a real
/// backend (e.g. Redis) use this the same way a `SET key value NX PX ttl`
/// dance does: only the holder presenting the matching token may delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message published on the cluster bus (§4.4, §5). Instances other than
/// the publisher act on it and then emit the relevant echo/notification
/// through their local Transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClusterMessage {
    /// An access-list mutation evicted `user` from `room`; every instance
    /// holding a local socket of `user` joined to `room` must run the leave
    /// protocol for it. `origin_instance` lets the publisher's own
    /// subscriber loop skip work it already did synchronously.
    DisconnectUserFromRoom {
        user: String,
        room: String,
        origin_instance: String,
    },
    /// A room is being deleted; every instance must evict its local members.
    RoomRemoved { room: String, origin_instance: String },
}

/// The cluster-bus topic all instances of one chat service subscribe to.
pub const CLUSTER_BUS_TOPIC: &str = "chat-engine:cluster-bus";

/// Durable/shared key-value and set operations, distributed locks, and
/// pub/sub, as required by the user-association and room-access-list
/// protocols (§4.3, §4.4, §5).
#[async_trait]
pub trait State: Send + Sync {
    async fn kv_get(&self, key: &str) -> ChatResult<Option<String>>;
    async fn kv_set(&self, key: &str, value: &str) -> ChatResult<()>;
    async fn kv_del(&self, key: &str) -> ChatResult<()>;

    async fn set_add(&self, key: &str, member: &str) -> ChatResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> ChatResult<()>;
    async fn set_members(&self, key: &str) -> ChatResult<HashSet<String>>;
    async fn set_card(&self, key: &str) -> ChatResult<usize> {
        Ok(self.set_members(key).await?.len())
    }

    async fn hash_get(&self, key: &str, field: &str) -> ChatResult<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> ChatResult<()>;
    async fn hash_del(&self, key: &str, field: &str) -> ChatResult<()>;
    async fn hash_keys(&self, key: &str) -> ChatResult<Vec<String>>;

    /// Atomic increment-and-get, used for monotonic per-room message IDs.
    async fn incr(&self, key: &str) -> ChatResult<u64>;

    /// Acquire the named lock, blocking (with backoff) until it is free or
    /// until acquisition has taken unreasonably long relative to `ttl`.
    async fn lock_acquire(&self, name: &str, ttl: Duration) -> ChatResult<LockToken>;
    /// Release a lock previously acquired with the matching token. A no-op,
    /// not an error, if the lock already expired or was stolen (§5: "a lock
    /// is considered released" on TTL expiry).
    async fn lock_release(&self, name: &str, token: &LockToken) -> ChatResult<()>;

    async fn publish(&self, topic: &str, message: ClusterMessage) -> ChatResult<()>;
    /// Subscribe to a cluster-bus topic. Each call yields an independent
    /// receiver (broadcast semantics — every subscriber sees every message).
    fn subscribe(&self, topic: &str) -> tokio::sync::broadcast::Receiver<ClusterMessage>;
}

/// Acquire `name`, run `f`, and release the lock regardless of `f`'s
/// outcome (§5: "the implementation MUST guarantee lock release on all exit
/// paths, including failure").
pub async fn with_lock<T, F, Fut>(state: &dyn State, name: &str, ttl: Duration, f: F) -> ChatResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ChatResult<T>>,
{
    let token = state.lock_acquire(name, ttl).await?;
    let result = f().await;
    if let Err(e) = state.lock_release(name, &token).await {
        tracing::warn!(lock = name, error = %e, "failed to release lock after use");
    }
    result
}

/// Lock name for a room's list/mode mutations and eviction enumeration.
pub fn room_lock_name(room_name: &str) -> String {
    format!("lock:room:{room_name}")
}

/// Lock name for join/leave of `user_name` to `room_name`.
pub fn join_lock_name(user_name: &str, room_name: &str) -> String {
    format!("lock:join:{user_name}:{room_name}")
}

/// Lock name for socket registration/removal of `user_name`.
pub fn user_lock_name(user_name: &str) -> String {
    format!("lock:user:{user_name}")
}
