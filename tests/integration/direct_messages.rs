//! §8 scenario 5 and P6: `directMessage` gated by the feature flag, the
//! recipient's `DirectMessaging` admission, and at least one online socket.

use crate::common::{connect, harness, harness_with_options};
use chat_engine::{ChatServiceOptions, ExecOptions};
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn scenario_5_direct_messages_disabled_is_not_allowed() {
    let options = ChatServiceOptions { enable_direct_messages: false, ..Default::default() };
    let (service, transport) = harness_with_options(options);
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;

    let err = service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);
}

#[tokio::test]
async fn direct_message_delivered_to_recipient_and_echoed_to_sender() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;

    service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap();

    let bob_events = transport.take_emitted("sb");
    assert!(bob_events.iter().any(|(name, payload)| name == "directMessage" && payload["textMessage"] == "hi"));
    let alice_events = transport.take_emitted("sa");
    assert!(alice_events.iter().any(|(name, _)| name == "directMessageEcho"));
}

#[tokio::test]
async fn direct_message_blocked_by_blacklist() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;

    service
        .exec("directAddToList", "bob", local("sb"), vec![json!("blacklist"), json!(["alice"])])
        .await
        .unwrap();

    let err = service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);
}

#[tokio::test]
async fn direct_message_to_offline_user_is_no_user_online() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap(); // bob never connects a socket
    connect(&service, &transport, "sa", "alice").await;

    let err = service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NoUserOnline);
}

#[tokio::test]
async fn whitelist_only_mode_requires_sender_membership() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;

    service.exec("directSetWhitelistMode", "bob", local("sb"), vec![json!(true)]).await.unwrap();

    let err = service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);

    service.exec("directAddToList", "bob", local("sb"), vec![json!("whitelist"), json!(["alice"])]).await.unwrap();
    service
        .exec("directMessage", "alice", local("sa"), vec![json!("bob"), json!({ "textMessage": "hi" })])
        .await
        .unwrap();
}

#[tokio::test]
async fn cannot_add_own_name_to_own_direct_messaging_list() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "sa", "alice").await;

    let err = service
        .exec("directAddToList", "alice", local("sa"), vec![json!("blacklist"), json!(["alice"])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);
}
