//! Room and Room Manager (spec §4.4, §4.5). A room owns one [`LwwMap`]
//! document, its connected members, and its function registry. The room
//! manager owns room lifecycle and routes operation broadcasts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::crdt::map::LwwMap;
use crate::crdt::{Crdt, Operation};
use crate::presence::PresenceManager;
use crate::protocol::{ServerMessage, User};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type FunctionResult = Result<serde_json::Value, String>;

/// Context injected into a registered function call. The Python source
/// injects `_room`/`_user` into `kwargs`; this crate threads them as typed
/// fields instead, which is the idiomatic Rust equivalent of "inject
/// context into an untyped call".
pub struct CallContext {
    pub room: Arc<Room>,
    pub user: Option<User>,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Value,
}

pub type ServerFunctionHandler = Arc<dyn Fn(CallContext) -> BoxFuture<FunctionResult> + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub handler: ServerFunctionHandler,
    pub requires_auth: bool,
    pub required_permissions: Vec<String>,
}

/// `[A-Za-z_][A-Za-z0-9_]{0,511}` (spec §3).
pub fn is_valid_function_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 512 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Member {
    user: User,
    connection_id: String,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

pub struct Room {
    pub room_id: String,
    pub node_id: String,
    state: Mutex<LwwMap>,
    members: Mutex<HashMap<String, Member>>,
    functions: RwLock<HashMap<String, RegisteredFunction>>,
    metadata: Mutex<HashMap<String, serde_json::Value>>,
}

impl Room {
    pub fn new(room_id: impl Into<String>, initial_state: Option<serde_json::Value>) -> Self {
        let room_id = room_id.into();
        let node_id = format!("server-{room_id}");
        let mut state = LwwMap::new(node_id.clone());
        if let Some(serde_json::Value::Object(map)) = initial_state {
            for (key, value) in map {
                let _ = state.set(vec![key], value);
            }
        }
        Self {
            room_id,
            node_id,
            state: Mutex::new(state),
            members: Mutex::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
        }
    }

    pub async fn value(&self) -> serde_json::Value {
        self.state.lock().await.value()
    }

    pub async fn apply_operation(&self, op: Operation) -> bool {
        self.state.lock().await.apply(op)
    }

    pub async fn operations_since(&self, ts: f64) -> Vec<Operation> {
        self.state.lock().await.operations_since(ts)
    }

    pub async fn all_operations(&self) -> Vec<Operation> {
        self.state.lock().await.all_operations().to_vec()
    }

    pub async fn version_vector(&self) -> HashMap<String, f64> {
        self.state.lock().await.version_vector()
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.lock().await.insert(key.into(), value);
    }

    pub async fn add_user(&self, user: User, connection_id: String, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.members.lock().await.insert(user.id.clone(), Member { user, connection_id, sender });
    }

    pub async fn remove_user(&self, user_id: &str) -> Option<User> {
        self.members.lock().await.remove(user_id).map(|m| m.user)
    }

    pub async fn has_user(&self, user_id: &str) -> bool {
        self.members.lock().await.contains_key(user_id)
    }

    pub async fn users(&self) -> Vec<User> {
        self.members.lock().await.values().map(|m| m.user.clone()).collect()
    }

    pub async fn user_count(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    pub async fn sender_for(&self, user_id: &str) -> Option<mpsc::UnboundedSender<ServerMessage>> {
        self.members.lock().await.get(user_id).map(|m| m.sender.clone())
    }

    pub async fn register_function(&self, func: RegisteredFunction) {
        self.functions.write().await.insert(func.name.clone(), func);
    }

    pub async fn get_function(&self, name: &str) -> Option<RegisteredFunction> {
        self.functions.read().await.get(name).cloned()
    }

    pub async fn has_function(&self, name: &str) -> bool {
        self.functions.read().await.contains_key(name)
    }

    pub async fn call_function(self: &Arc<Self>, name: &str, args: Vec<serde_json::Value>, kwargs: serde_json::Value, user: Option<User>) -> Result<FunctionResult, ()> {
        let Some(func) = self.get_function(name).await else {
            return Err(());
        };
        let ctx = CallContext {
            room: self.clone(),
            user,
            args,
            kwargs,
        };
        Ok((func.handler)(ctx).await)
    }

    /// Fan out `msg` to every member except `exclude_user`/`exclude_connection`
    /// (spec §4.4). Sending into an unbounded per-connection channel is a
    /// synchronous, non-blocking op — the actual socket write happens on the
    /// owning connection task, so the member-map lock is never held across
    /// real I/O. Members whose channel has been dropped (their task exited)
    /// are evicted after the lock is released (spec §4.9/Design Note 9).
    pub async fn broadcast(&self, msg: ServerMessage, exclude_user: Option<&str>, exclude_connection: Option<&str>) {
        let mut failed = Vec::new();
        {
            let members = self.members.lock().await;
            for (user_id, member) in members.iter() {
                if Some(user_id.as_str()) == exclude_user {
                    continue;
                }
                if let Some(excluded) = exclude_connection {
                    if member.connection_id == excluded {
                        continue;
                    }
                }
                if member.sender.send(msg.clone()).is_err() {
                    failed.push(user_id.clone());
                }
            }
        }
        for user_id in failed {
            warn!("evicting unreachable member {user_id} from room {}", self.room_id);
            self.remove_user(&user_id).await;
        }
    }
}

type RoomCallback = Box<dyn Fn(&Arc<Room>) + Send + Sync>;
type RoomDeletedCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct RoomManager {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    global_functions: RwLock<HashMap<String, RegisteredFunction>>,
    presence: Arc<PresenceManager>,
    on_room_created: Mutex<Vec<RoomCallback>>,
    on_room_deleted: Mutex<Vec<RoomDeletedCallback>>,
}

impl RoomManager {
    pub fn new(presence: Arc<PresenceManager>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            global_functions: RwLock::new(HashMap::new()),
            presence,
            on_room_created: Mutex::new(Vec::new()),
            on_room_deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceManager> {
        &self.presence
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn create_room(&self, room_id: Option<String>, initial_state: Option<serde_json::Value>) -> Arc<Room> {
        let room_id = room_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut rooms = self.rooms.lock().await;
        if let Some(existing) = rooms.get(&room_id) {
            return existing.clone();
        }
        let room = Arc::new(Room::new(room_id.clone(), initial_state));
        for func in self.global_functions.read().await.values() {
            room.register_function(func.clone()).await;
        }
        rooms.insert(room_id, room.clone());
        drop(rooms);

        for callback in self.on_room_created.lock().await.iter() {
            callback(&room);
        }
        room
    }

    pub async fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    pub async fn get_or_create_room(&self, room_id: &str, initial_state: Option<serde_json::Value>) -> Arc<Room> {
        if let Some(room) = self.get_room(room_id).await {
            return room;
        }
        self.create_room(Some(room_id.to_string()), initial_state).await
    }

    pub async fn delete_room(&self, room_id: &str) -> bool {
        let removed = self.rooms.lock().await.remove(room_id).is_some();
        if removed {
            for callback in self.on_room_deleted.lock().await.iter() {
                callback(room_id);
            }
        }
        removed
    }

    pub async fn has_room(&self, room_id: &str) -> bool {
        self.rooms.lock().await.contains_key(room_id)
    }

    pub async fn register_function(&self, func: RegisteredFunction) {
        self.global_functions.write().await.insert(func.name.clone(), func.clone());
        for room in self.rooms.lock().await.values() {
            room.register_function(func.clone()).await;
        }
    }

    pub async fn broadcast_operation(&self, room_id: &str, operation: Operation, sender_id: &str, exclude_sender: bool) {
        let Some(room) = self.get_room(room_id).await else {
            return;
        };
        let msg = ServerMessage::Operation {
            room_id: room_id.to_string(),
            user_id: sender_id.to_string(),
            operation,
        };
        let exclude = if exclude_sender { Some(sender_id) } else { None };
        room.broadcast(msg, exclude, None).await;
    }

    pub async fn cleanup_empty_rooms(&self) -> usize {
        let mut rooms = self.rooms.lock().await;
        let mut empty = Vec::new();
        for (id, room) in rooms.iter() {
            if room.is_empty().await {
                empty.push(id.clone());
            }
        }
        for id in &empty {
            rooms.remove(id);
        }
        empty.len()
    }

    pub async fn on_room_created<F: Fn(&Arc<Room>) + Send + Sync + 'static>(&self, callback: F) {
        self.on_room_created.lock().await.push(Box::new(callback));
    }

    pub async fn on_room_deleted<F: Fn(&str) + Send + Sync + 'static>(&self, callback: F) {
        self.on_room_deleted.lock().await.push(Box::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> ServerFunctionHandler {
        Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!("ok")) }))
    }

    #[tokio::test]
    async fn add_and_remove_user() {
        let room = Room::new("r1", None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = User::new("u1".into(), "Ada".into(), serde_json::json!({})).unwrap();
        room.add_user(user.clone(), "c1".into(), tx).await;
        assert!(room.has_user("u1").await);
        let removed = room.remove_user("u1").await.unwrap();
        assert_eq!(removed.id, "u1");
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_and_evicts_dropped_receivers() {
        let room = Room::new("r1", None);
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        drop(rx_b);

        room.add_user(User::new("a".into(), "A".into(), serde_json::json!({})).unwrap(), "ca".into(), tx_a).await;
        room.add_user(User::new("b".into(), "B".into(), serde_json::json!({})).unwrap(), "cb".into(), tx_b).await;

        room.broadcast(ServerMessage::Ping, Some("a"), None).await;

        assert!(rx_a.try_recv().is_err());
        assert!(!room.has_user("b").await);
    }

    #[tokio::test]
    async fn call_function_injects_room_and_user() {
        let room = Arc::new(Room::new("r1", None));
        room.register_function(RegisteredFunction {
            name: "ping".into(),
            handler: noop_handler(),
            requires_auth: false,
            required_permissions: vec![],
        })
        .await;
        let result = room.call_function("ping", vec![], serde_json::json!({}), None).await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!("ok"));
    }

    #[tokio::test]
    async fn room_manager_propagates_global_functions_to_new_rooms() {
        let presence = Arc::new(PresenceManager::new(60.0, 30.0));
        let manager = RoomManager::new(presence);
        manager
            .register_function(RegisteredFunction {
                name: "echo".into(),
                handler: noop_handler(),
                requires_auth: false,
                required_permissions: vec![],
            })
            .await;
        let room = manager.create_room(Some("r1".into()), None).await;
        assert!(room.has_function("echo").await);
    }

    #[test]
    fn function_name_validation() {
        assert!(is_valid_function_name("do_thing"));
        assert!(!is_valid_function_name("1bad"));
        assert!(!is_valid_function_name(""));
    }
}
