//! Authentication, lockout and permission gating.

use std::sync::Arc;

use collabkit::config::Config;
use collabkit::permissions::{Permission, Role};
use collabkit::protocol::{parse_client_message, ErrorCode, ServerMessage};
use collabkit::room::{CallContext, FunctionResult, RegisteredFunction};

use crate::common::{build_dispatcher, drain, join_message, new_session, op_message};

#[tokio::test]
async fn anonymous_user_is_rejected_from_an_auth_required_function() {
    let dispatcher = build_dispatcher(Config::default());
    let (anon, mut anon_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&anon, join_message("r1")).await;
    drain(&mut anon_rx).await;

    let room = dispatcher.rooms.get_room("r1").await.unwrap();
    room.register_function(RegisteredFunction {
        name: "admin_only".into(),
        handler: Arc::new(|_ctx: CallContext| Box::pin(async move { Ok(serde_json::json!("secret")) as FunctionResult })),
        requires_auth: true,
        required_permissions: vec![],
    })
    .await;

    dispatcher
        .handle_message(
            &anon,
            parse_client_message(r#"{"type":"call","room_id":"r1","call_id":"c1","function_name":"admin_only","args":[],"kwargs":{}}"#).unwrap(),
        )
        .await;

    let messages = drain(&mut anon_rx).await;
    assert!(matches!(
        messages.last(),
        Some(ServerMessage::CallResult { success: false, .. })
    ));
}

#[tokio::test]
async fn repeated_auth_failures_trigger_lockout() {
    let mut config = Config::default();
    config.auth_max_attempts = 2;
    let dispatcher = build_dispatcher(config);
    let (session, mut rx) = new_session(&dispatcher);

    for _ in 0..2 {
        dispatcher
            .handle_message(&session, parse_client_message(r#"{"type":"auth","token":"wrong"}"#).unwrap())
            .await;
    }
    dispatcher
        .handle_message(&session, parse_client_message(r#"{"type":"auth","token":"good-token"}"#).unwrap())
        .await;

    let messages = drain(&mut rx).await;
    let last = messages.last().unwrap();
    match last {
        ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::RateLimited.as_str()),
        other => panic!("expected rate_limited error, got {other:?}"),
    }
}

#[tokio::test]
async fn assigned_role_gates_write_access() {
    let dispatcher = build_dispatcher(Config::default());
    let (alice, mut alice_rx) = new_session(&dispatcher);
    dispatcher.handle_message(&alice, join_message("r1")).await;
    drain(&mut alice_rx).await;
    let user_id = alice.current_user().await.id;

    dispatcher.permissions.lock().await.assign_role(user_id.clone(), "room:r1", Role::viewer());
    assert!(!dispatcher.permissions.lock().await.check_permission(&user_id, "room:r1", Permission::Write));

    dispatcher.handle_message(&alice, op_message("r1", &["x"], serde_json::json!(1))).await;
    let messages = drain(&mut alice_rx).await;
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Error { code, .. } if *code == ErrorCode::PermissionDenied.as_str())));
}
