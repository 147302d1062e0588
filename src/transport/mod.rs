//! Transport contract (C3, §6): per-socket registry, channel join/leave,
//! targeted/broadcast emit, disconnect.
//!
//! Concrete wire framing (socket.io-compatible acknowledgements, the actual
//! network listener) is out of scope (§1); [`memory::InMemoryTransport`] is
//! the in-process reference implementation used by tests and by the
//! in-memory deployment.

mod memory;

pub use memory::InMemoryTransport;

use crate::error::ChatResult;
use async_trait::async_trait;
use serde_json::Value;

/// A connection accepted by the transport but not yet bound to a user.
#[derive(Debug, Clone)]
pub struct PendingSocket {
    pub socket_id: String,
    pub auth_payload: Value,
}

/// Per-socket registry, channel join/leave, targeted/broadcast emit,
/// disconnect. One instance of a transport implementation serves exactly one
/// process/instance; socket IDs are only ever meaningful to their owning
/// instance (§5: "only the owning instance may emit to a specific socket
/// ID").
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pop the next accepted-but-unbound connection, if any. The concrete
    /// accept loop (listening on a real network transport) is out of scope;
    /// this is the seam [`crate::service::ChatService`] polls to bind new
    /// sockets to users via the `onConnect` hook.
    async fn poll_pending(&self) -> Option<PendingSocket>;

    /// Pop the next socket the transport has observed going away — a client
    /// closing the connection on its own, distinct from an engine-initiated
    /// [`Transport::disconnect`] — whose `removeSocket` cleanup (§4.4) has
    /// not yet run. The concrete disconnect-detection loop (watching a real
    /// network transport) is out of scope (§1); this is the seam
    /// [`crate::service::ChatService`] drains to run that cleanup, symmetric
    /// to `poll_pending`.
    async fn poll_disconnected(&self) -> Option<String>;

    /// Whether `socket_id` is still known to the transport (used by
    /// `registerSocket` to detect a client that already disconnected before
    /// registration completed, §4.4).
    fn has_socket(&self, socket_id: &str) -> bool;

    async fn emit(&self, socket_id: &str, event: &str, payload: Value) -> ChatResult<()>;
    async fn disconnect(&self, socket_id: &str, reason: Option<&str>) -> ChatResult<()>;

    async fn join_channel(&self, socket_id: &str, channel: &str) -> ChatResult<()>;
    async fn leave_channel(&self, socket_id: &str, channel: &str) -> ChatResult<()>;

    async fn emit_to_channel(&self, channel: &str, event: &str, payload: Value) -> ChatResult<()>;
    /// Broadcast to every socket in `channel` except `exclude_socket_id`.
    async fn send_to_channel(
        &self,
        exclude_socket_id: &str,
        channel: &str,
        event: &str,
        payload: Value,
    ) -> ChatResult<()>;

    /// Stop accepting new connections (used by `ChatService::close`).
    async fn stop_accepting(&self);
}
