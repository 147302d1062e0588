//! §8 scenario 4 and P3/P4: monotonic, gap-free message IDs and bounded,
//! FIFO-trimmed history, driven through the command pipeline rather than
//! `Room` directly.

use crate::common::{connect, harness, harness_with_options};
use chat_engine::{ChatServiceOptions, ExecOptions};
use serde_json::json;

fn local(socket_id: &str) -> ExecOptions {
    ExecOptions { id: Some(socket_id.to_string()), bypass_permissions: false, is_local_call: false }
}

#[tokio::test]
async fn scenario_4_history_ring_and_paged_fetch() {
    let options = ChatServiceOptions { history_max_messages: 10_000, history_max_get_messages: 10_000, ..Default::default() };
    let (service, transport) = harness_with_options(options);
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();
    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();

    for _ in 0..10_010u32 {
        service
            .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!({ "textMessage": "x" })])
            .await
            .unwrap();
    }

    let info = service.exec("roomHistoryInfo", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(info[0]["lastId"], json!(10_010));

    let page = service.exec("roomHistoryGet", "alice", local("s1"), vec![json!("r"), json!(0), json!(10_000)]).await.unwrap();
    let messages = page[0].as_array().unwrap();
    assert_eq!(messages.len(), 10_000);
    assert_eq!(messages.first().unwrap()["id"], json!(11));
    assert_eq!(messages.last().unwrap()["id"], json!(10_010));
}

#[tokio::test]
async fn history_get_only_returns_ids_greater_than_requested() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();
    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();

    for i in 1..=5 {
        service
            .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!({ "textMessage": format!("m{i}") })])
            .await
            .unwrap();
    }

    let page = service.exec("roomHistoryGet", "alice", local("s1"), vec![json!("r"), json!(3), json!(100)]).await.unwrap();
    let messages = page[0].as_array().unwrap();
    let ids: Vec<u64> = messages.iter().map(|m| m["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![4, 5]);
}

#[tokio::test]
async fn recent_history_returns_up_to_the_cap() {
    let (service, transport) = harness();
    service.add_user("alice").unwrap();
    connect(&service, &transport, "s1", "alice").await;
    service.add_room("r", Default::default()).unwrap();
    service.exec("roomJoin", "alice", local("s1"), vec![json!("r")]).await.unwrap();

    for i in 1..=3 {
        service
            .exec("roomMessage", "alice", local("s1"), vec![json!("r"), json!({ "textMessage": format!("m{i}") })])
            .await
            .unwrap();
    }

    let recent = service.exec("roomRecentHistory", "alice", local("s1"), vec![json!("r")]).await.unwrap();
    assert_eq!(recent[0].as_array().unwrap().len(), 3);
}
