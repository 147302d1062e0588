//! Shared harness for the integration suite: an in-memory `ChatService`
//! wired with an `onConnect` hook that trusts the `user` field of the
//! simulated auth payload, plus helpers to drive a socket through the
//! connect/join protocol and drain what it was sent.

use chat_engine::{ChatService, ChatServiceOptions, InMemoryState, InMemoryTransport};
use serde_json::Value;
use std::sync::Arc;

pub fn harness() -> (Arc<ChatService>, Arc<InMemoryTransport>) {
    harness_with_options(ChatServiceOptions::default())
}

/// Like [`harness`] but also returns the `InMemoryState` backing it, for
/// tests that need to inspect cluster-wide keys directly.
pub fn harness_with_state() -> (Arc<ChatService>, Arc<InMemoryTransport>, Arc<InMemoryState>) {
    harness_with_options_and_state(ChatServiceOptions::default())
}

/// Route `tracing` output through the test harness so `RUST_LOG` can surface
/// lock/eviction/consistency logging while chasing down a failing test.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn harness_with_options(options: ChatServiceOptions) -> (Arc<ChatService>, Arc<InMemoryTransport>) {
    let (service, transport, _state) = harness_with_options_and_state(options);
    (service, transport)
}

pub fn harness_with_options_and_state(options: ChatServiceOptions) -> (Arc<ChatService>, Arc<InMemoryTransport>, Arc<InMemoryState>) {
    init_tracing();
    let state: Arc<InMemoryState> = Arc::new(InMemoryState::new());
    let dyn_state: Arc<dyn chat_engine::State> = state.clone();
    let transport = Arc::new(InMemoryTransport::new());
    let dyn_transport: Arc<dyn chat_engine::Transport> = transport.clone();
    let service = ChatService::new(options, dyn_state, dyn_transport);
    service.set_on_connect(Arc::new(|payload: Value| {
        Box::pin(async move {
            payload
                .get("user")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| chat_engine::ChatError::new(chat_engine::ErrorKind::BadArgument, "missing 'user' in auth payload"))
        })
    }));
    (service, transport, state)
}

/// Simulate a client connecting as `user_name` on `socket_id`, drive it
/// through `ChatService`'s accept loop, and discard the `loginConfirmed`
/// echo so call sites start from a clean slate.
pub async fn connect(service: &ChatService, transport: &InMemoryTransport, socket_id: &str, user_name: &str) {
    transport.simulate_connect(socket_id, serde_json::json!({ "user": user_name }));
    service.accept_pending().await.unwrap();
    transport.take_emitted(socket_id);
}

pub fn event_names(events: &[(String, Value)]) -> Vec<String> {
    events.iter().map(|(name, _)| name.clone()).collect()
}
