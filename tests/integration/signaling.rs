//! WebRTC screenshare exclusivity.

use collabkit::config::Config;
use collabkit::protocol::{parse_client_message, ErrorCode, ServerMessage};

use crate::common::{build_dispatcher, drain, join_message, new_session};

#[tokio::test]
async fn only_one_screen_sharer_per_room() {
    let dispatcher = build_dispatcher(Config::default());
    let (alice, mut alice_rx) = new_session(&dispatcher);
    let (bob, mut bob_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&alice, join_message("r1")).await;
    dispatcher.handle_message(&bob, join_message("r1")).await;
    drain(&mut alice_rx).await;
    drain(&mut bob_rx).await;

    dispatcher
        .handle_message(&alice, parse_client_message(r#"{"type":"screenshare_start","room_id":"r1"}"#).unwrap())
        .await;
    dispatcher
        .handle_message(&bob, parse_client_message(r#"{"type":"screenshare_start","room_id":"r1"}"#).unwrap())
        .await;

    let bob_messages = drain(&mut bob_rx).await;
    assert!(bob_messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Error { code, .. } if *code == ErrorCode::PermissionDenied.as_str())));
}
