//! §8 scenario 3 and properties P2/P5: whitelist-only admission and
//! eviction on a disallowing list mutation.

use crate::common::{connect, event_names, harness};
use chat_engine::{ExecOptions, RoomOptions};
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn scenario_3_whitelist_removal_evicts_member() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    connect(&service, &transport, "sb", "bob").await;
    service.add_room("r", RoomOptions { owner: Some("alice".to_string()), whitelist_only: true }).unwrap();

    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    service
        .exec("roomAddToList", "alice", local("s1"), vec![json!("r"), json!("whitelist"), json!(["bob"])])
        .await
        .unwrap();

    service.exec("roomJoin", "bob", local("sb"), vec![json!("r")]).await.unwrap();

    transport.take_emitted("s1");
    transport.take_emitted("sb");

    service
        .exec("roomRemoveFromList", "alice", local("s1"), vec![json!("r"), json!("whitelist"), json!(["bob"])])
        .await
        .unwrap();

    let bob_events = transport.take_emitted("sb");
    let names = event_names(&bob_events);
    assert!(names.contains(&"roomAccessRemoved".to_string()));
    assert!(names.contains(&"roomLeftEcho".to_string()));

    let alice_events = transport.take_emitted("s1");
    let names = event_names(&alice_events);
    assert!(names.contains(&"roomUserLeft".to_string()));
    assert!(names.contains(&"roomAccessListRemoved".to_string()));

    // Rejoining without bypass now fails admission (P2).
    let err = service.exec("roomJoin", "bob", local("sb"), vec![json!("r")]).await.unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);
}

#[tokio::test]
async fn owner_is_immune_to_whitelist_only_eviction() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", RoomOptions { owner: Some("alice".to_string()), whitelist_only: false }).unwrap();
    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();

    service
        .exec("roomSetWhitelistMode", "alice", local("s1"), vec![json!("r"), json!(true)])
        .await
        .unwrap();

    // Alice (the owner) was never evicted, so a second roomJoin just reports
    // she's still the sole member.
    let n = service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(n, vec![json!(1)]);
}

#[tokio::test]
async fn non_admin_cannot_mutate_access_lists() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_user("bob").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    connect(&service, &transport, "sb", "bob").await;
    service.add_room("r", RoomOptions { owner: Some("alice".to_string()), whitelist_only: false }).unwrap();

    let err = service
        .exec("roomAddToList", "bob", local("sb"), vec![json!("r"), json!("blacklist"), json!(["eve"])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NotAllowed);
}

#[tokio::test]
async fn add_then_remove_same_name_is_a_no_op_on_the_list() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", RoomOptions { owner: Some("alice".to_string()), whitelist_only: false }).unwrap();

    service
        .exec("roomAddToList", "alice", local("s1"), vec![json!("r"), json!("blacklist"), json!(["eve"])])
        .await
        .unwrap();
    service
        .exec("roomRemoveFromList", "alice", local("s1"), vec![json!("r"), json!("blacklist"), json!(["eve"])])
        .await
        .unwrap();

    let list = service
        .exec("roomGetAccessList", "alice", local("s1"), vec![json!("r"), json!("blacklist")])
        .await
        .unwrap();
    assert_eq!(list[0], json!([]));
}
