//! §8 scenarios 1 & 2: joining a room, posting a message, and the echo
//! ordering between a user's own sockets and the room channel.

use crate::common::{connect, event_names, harness};
use chat_engine::ExecOptions;
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn scenario_1_join_and_post_a_message() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();

    let result = service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(result, vec![json!(1)]);

    let ack = service
        .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!({ "textMessage": "hi" })])
        .await
        .unwrap();
    assert_eq!(ack[0]["id"], json!(1));

    let events = transport.take_emitted("s1");
    let (name, payload) = events
        .iter()
        .find(|(name, _)| name == "roomMessage")
        .expect("room channel delivers roomMessage to its own member");
    assert_eq!(name, "roomMessage");
    assert_eq!(payload["room"], "r");
    assert_eq!(payload["message"]["id"], 1);
    assert_eq!(payload["message"]["author"], "alice");
    assert_eq!(payload["message"]["textMessage"], "hi");
    assert!(payload["message"]["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn scenario_2_two_sockets_see_joined_echo_and_room_sees_one_user_joined() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    service.add_room("r", Default::default()).unwrap();
    connect(&service, &transport, "s1", "alice").await;
    connect(&service, &transport, "s2", "alice").await;

    let n = service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(n, vec![json!(1)]);

    // s2 sees the roomJoinedEcho for s1 on the shared echo channel, and the
    // room channel (no members yet besides alice) sees roomUserJoined.
    let s2_events = transport.take_emitted("s2");
    assert!(event_names(&s2_events).contains(&"roomJoinedEcho".to_string()));
    let s1_events = transport.take_emitted("s1");
    assert!(event_names(&s1_events).contains(&"roomUserJoined".to_string()));

    let n = service.exec("roomJoin", "alice", local("s2"), vec![json!("r")]).await.unwrap();
    assert_eq!(n, vec![json!(2)]);

    // s1 now sees the echo for s2's join...
    let s1_events = transport.take_emitted("s1");
    assert!(event_names(&s1_events).contains(&"roomJoinedEcho".to_string()));
    // ...but alice was already a member, so no second roomUserJoined fires.
    assert!(!event_names(&s1_events).contains(&"roomUserJoined".to_string()));
}

#[tokio::test]
async fn room_join_requires_a_socket_id() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();

    let err = service.exec("roomJoin", "alice", ExecOptions::default(), vec![json!("r")]).await.unwrap_err();
    assert_eq!(err.kind, chat_engine::ErrorKind::NoSocket);
}

#[tokio::test]
async fn list_rooms_and_list_joined_sockets() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r1", Default::default()).unwrap();
    service.add_room("r2", Default::default()).unwrap();

    service.exec("roomJoin", "alice", local("s1"), vec![json!("r1")]).await.unwrap();

    let rooms = service.exec("listRooms", "alice", local("s1"), vec![]).await.unwrap();
    let names: Vec<String> = serde_json::from_value(rooms[0].clone()).unwrap();
    assert_eq!(names, vec!["r1".to_string(), "r2".to_string()]);

    let joined = service.exec("listJoinedSockets", "alice", local("s1"), vec![]).await.unwrap();
    let map: std::collections::HashMap<String, Vec<String>> = serde_json::from_value(joined[0].clone()).unwrap();
    assert_eq!(map.get("s1"), Some(&vec!["r1".to_string()]));
}
