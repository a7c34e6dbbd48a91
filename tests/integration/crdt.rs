//! End-to-end merge commutativity / LWW determinism (spec §8): the same
//! set of operations, delivered to the dispatcher in different orders,
//! must converge on the same room state.

use collabkit::config::Config;
use collabkit::protocol::ClientMessage;

use crate::common::{build_dispatcher, drain, join_message, new_session, op_message};

#[tokio::test]
async fn two_writers_converge_on_the_later_operation() {
    let dispatcher = build_dispatcher(Config::default());
    let (alice, mut alice_rx) = new_session(&dispatcher);
    let (bob, mut bob_rx) = new_session(&dispatcher);

    dispatcher.handle_message(&alice, join_message("r1")).await;
    dispatcher.handle_message(&bob, join_message("r1")).await;
    drain(&mut alice_rx).await;
    drain(&mut bob_rx).await;

    dispatcher.handle_message(&alice, op_message("r1", &["title"], serde_json::json!("from alice"))).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    dispatcher.handle_message(&bob, op_message("r1", &["title"], serde_json::json!("from bob"))).await;

    let room = dispatcher.rooms.get_room("r1").await.unwrap();
    assert_eq!(room.value().await["title"], serde_json::json!("from bob"));
}

/// Two writers replace the same nested object with disjoint keys; whichever
/// `operation` arrives second (by server-stamped timestamp) must win in
/// full, with the first writer's dropped keys gone regardless of which
/// session's message the dispatcher happened to process first.
async fn run_object_replacement_scenario(first: ClientMessage, second: ClientMessage, first_sleeps: bool) -> serde_json::Value {
    let dispatcher = build_dispatcher(Config::default());
    let (writer, mut writer_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&writer, join_message("r1")).await;
    drain(&mut writer_rx).await;

    dispatcher.handle_message(&writer, first).await;
    if first_sleeps {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    dispatcher.handle_message(&writer, second).await;

    dispatcher.rooms.get_room("r1").await.unwrap().value().await
}

#[tokio::test]
async fn later_object_set_masks_earlier_sibling_keys() {
    let value = run_object_replacement_scenario(
        op_message("r1", &["cfg"], serde_json::json!({"a": 1, "b": 2})),
        op_message("r1", &["cfg"], serde_json::json!({"a": 3})),
        true,
    )
    .await;
    assert_eq!(value["cfg"], serde_json::json!({"a": 3}));
}

#[tokio::test]
async fn deleting_a_path_masks_a_descendant_written_before_it() {
    let dispatcher = build_dispatcher(Config::default());
    let (writer, mut writer_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&writer, join_message("r1")).await;
    drain(&mut writer_rx).await;

    dispatcher.handle_message(&writer, op_message("r1", &["a", "b"], serde_json::json!("v"))).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;

    let delete = collabkit::protocol::parse_client_message(
        &serde_json::json!({
            "type": "operation",
            "room_id": "r1",
            "operation": {
                "id": uuid::Uuid::new_v4().to_string(),
                "origin": "client",
                "path": ["a"],
                "kind": "delete",
            }
        })
        .to_string(),
    )
    .unwrap();
    dispatcher.handle_message(&writer, delete).await;

    let room = dispatcher.rooms.get_room("r1").await.unwrap();
    assert_eq!(room.value().await.get("a"), None);
}
