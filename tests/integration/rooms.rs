//! Room lifecycle and join semantics.

use collabkit::config::Config;
use collabkit::protocol::ServerMessage;

use crate::common::{build_dispatcher, drain, join_message, new_session, op_message};

#[tokio::test]
async fn late_joiner_receives_current_state_in_joined_message() {
    let dispatcher = build_dispatcher(Config::default());
    let (alice, mut alice_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&alice, join_message("r1")).await;
    drain(&mut alice_rx).await;
    dispatcher.handle_message(&alice, op_message("r1", &["doc"], serde_json::json!("hello"))).await;

    let (bob, mut bob_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&bob, join_message("r1")).await;

    let messages = drain(&mut bob_rx).await;
    let joined = messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::Joined { state, .. } => Some(state.clone()),
            _ => None,
        })
        .expect("bob received a Joined message");
    assert_eq!(joined["doc"], serde_json::json!("hello"));
}
