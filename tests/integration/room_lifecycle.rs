//! §8 scenario 6: `removeRoom` evicts joined members and subsequent
//! commands against the dead room fail with `noRoom`.

use crate::common::{connect, event_names, harness};
use chat_engine::{ErrorKind, ExecOptions, RoomOptions};
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn scenario_6_remove_room_evicts_members_and_then_404s() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();
    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    transport.take_emitted("s1");

    service.remove_room("r").await.unwrap();

    let events = transport.take_emitted("s1");
    assert!(event_names(&events).contains(&"roomAccessRemoved".to_string()));

    let err = service
        .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!({ "textMessage": "hi" })])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoRoom);
}

#[tokio::test]
async fn room_delete_command_requires_ownership_unless_bypassed() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "sa", "alice").await;
    connect(&service, &transport, "sb", "bob").await;
    service.add_room("r", RoomOptions { owner: Some("alice".to_string()), whitelist_only: false }).unwrap();

    let err = service.exec("roomDelete", "bob", local("sb"), vec![json!("r")]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAllowed);

    service.exec("roomDelete", "alice", local("sa"), vec![json!("r")]).await.unwrap();
    let err = service.exec("roomGetOwner", "alice", local("sa"), vec![json!("r")]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoRoom);
}

#[tokio::test]
async fn room_management_disabled_rejects_create_and_delete() {
    let options = chat_engine::ChatServiceOptions { enable_rooms_management: false, ..Default::default() };
    let (service, transport) = crate::common::harness_with_options(options);
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;

    let err = service.exec("roomCreate", "alice", local("s1"), vec![json!("r"), json!(false)]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotAllowed);
}

#[tokio::test]
async fn room_create_command_makes_the_caller_the_owner() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;

    service.exec("roomCreate", "alice", local("s1"), vec![json!("r"), json!(false)]).await.unwrap();
    let owner = service.exec("roomGetOwner", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(owner[0], json!("alice"));
}
