//! Shared fixtures for the integration suite. Each test drives a
//! `Dispatcher` directly, with a `Session`'s `mpsc` channel standing in for
//! one WebSocket connection — this exercises the real dispatch/room/
//! presence/permission code without going through `rocket_ws`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use collabkit::auth::{AuthProvider, AuthUser};
use collabkit::config::Config;
use collabkit::errors::AuthError;
use collabkit::presence::PresenceManager;
use collabkit::protocol::{parse_client_message, ClientMessage, ServerMessage};
use collabkit::room::RoomManager;
use collabkit::session::{Dispatcher, Session};
use collabkit::storage::MemoryStorageBackend;

pub struct FixedAuthProvider;

#[async_trait]
impl AuthProvider for FixedAuthProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        if token == "good-token" {
            Ok(Some(AuthUser {
                id: "alice".into(),
                name: "Alice".into(),
                email: None,
                roles: vec![],
                metadata: serde_json::json!({}),
            }))
        } else {
            Ok(None)
        }
    }
}

pub fn build_dispatcher(config: Config) -> Arc<Dispatcher> {
    let presence = Arc::new(PresenceManager::new(config.presence_stale_timeout_secs, config.presence_cleanup_interval_secs));
    let rooms = Arc::new(RoomManager::new(presence));
    Arc::new(Dispatcher::new(rooms, Arc::new(FixedAuthProvider), Some(Arc::new(MemoryStorageBackend::new())), config))
}

pub fn new_session(dispatcher: &Dispatcher) -> (Arc<Session>, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Session::new(tx, &dispatcher.config)), rx)
}

pub async fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

pub fn join_message(room_id: &str) -> ClientMessage {
    parse_client_message(&format!(r#"{{"type":"join","room_id":"{room_id}","token":null}}"#)).unwrap()
}

pub fn op_message(room_id: &str, path: &[&str], value: serde_json::Value) -> ClientMessage {
    let raw = serde_json::json!({
        "type": "operation",
        "room_id": room_id,
        "operation": {
            "id": uuid::Uuid::new_v4().to_string(),
            "origin": "client",
            "path": path,
            "kind": "set",
            "value": value,
        }
    });
    parse_client_message(&raw.to_string()).unwrap()
}
