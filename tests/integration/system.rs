//! §6 `systemMessage`: broadcast to every connected socket via
//! [`chat_engine::SYSTEM_CHANNEL`], and observable server-side through
//! `subscribe_system_messages` (§9 supplemented feature).

use crate::common::{connect, event_names, harness};
use chat_engine::ExecOptions;
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn system_message_reaches_every_connected_socket() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;

    service.exec("systemMessage", "alice", local("sa"), vec![json!({ "text": "maintenance in 5" })]).await.unwrap();

    let bob_events = transport.take_emitted("sb");
    assert!(bob_events.iter().any(|(name, payload)| name == "systemMessage" && payload["payload"]["text"] == "maintenance in 5"));

    let alice_events = transport.take_emitted("sa");
    assert!(event_names(&alice_events).contains(&"systemMessage".to_string()));
}

#[tokio::test]
async fn subscribe_system_messages_observes_the_broadcast_server_side() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "sa", "alice").await;

    let mut receiver = service.subscribe_system_messages();

    service.exec("systemMessage", "alice", local("sa"), vec![json!({ "text": "hello" })]).await.unwrap();

    let envelope = receiver.recv().await.unwrap();
    assert_eq!(envelope["author"], json!("alice"));
    assert_eq!(envelope["payload"]["text"], json!("hello"));
}
