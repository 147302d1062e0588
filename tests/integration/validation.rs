//! §4.1/§4.5: argument validation precedes hooks and dispatch, and runs
//! identically whether invoked through a socket or through `exec`'s
//! server-side local-call path.

use crate::common::{connect, harness};
use chat_engine::{ErrorKind, ExecOptions};
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn unknown_command_is_no_command() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;

    let err = service.exec("doesNotExist", "alice", local("s1"), vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoCommand);
}

#[tokio::test]
async fn wrong_argument_count_is_rejected_before_dispatch() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;

    let err = service.exec("roomMessage", "alice", local("s1"), vec![json!("r")]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::WrongArgumentsCount);
}

#[tokio::test]
async fn bad_argument_type_reports_the_offending_position() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;

    let err = service
        .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!("not an object")])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadArgument);
    assert_eq!(err.argument_position, Some(1));
}

#[tokio::test]
async fn local_call_runs_without_a_socket_id() {
    let (service, _transport) = harness();
    service.add_user("alice").unwrap();
    service.add_room("r", Default::default()).unwrap();

    // Server-side calls (e.g. an admin console) have no socket at all;
    // `exec` must still validate and dispatch commands that don't themselves
    // require one.
    let opts = ExecOptions { id: None, bypass_permissions: true, is_local_call: true };
    let rooms = service.exec("listRooms", "alice", opts, vec![]).await.unwrap();
    assert_eq!(rooms[0], json!(["r"]));
}

#[tokio::test]
async fn invalid_user_name_is_rejected_on_add_user() {
    let (service, _transport) = harness();
    let err = service.add_user("has space").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidName);
}

#[tokio::test]
async fn duplicate_user_name_is_rejected() {
    let (service, _transport) = harness();
    service.add_user("alice").unwrap();
    let err = service.add_user("alice").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UserExists);
}

#[tokio::test]
async fn duplicate_room_name_is_rejected() {
    let (service, _transport) = harness();
    service.add_room("r", Default::default()).unwrap();
    let err = service.add_room("r", Default::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RoomExists);
}
