//! Per-connection state and the protocol dispatcher (spec §4.7, §4.8),
//! grounded on `collabkit/server.py`'s `RateLimiter`, `AuthRateLimiter`,
//! and `CollabkitServer._handle_*` methods.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use crate::auth::{AuthProvider, AuthUser};
use crate::config::Config;
use crate::crdt::now_seconds;
use crate::permissions::{Permission, PermissionManager};
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage, User};
use crate::room::RoomManager;
use crate::storage::{room_key, RoomSnapshot, StorageBackend};

/// Token-bucket limiter, refilled by elapsed wall-clock time and capped at
/// `rate` tokens (`collabkit/server.py::RateLimiter`).
pub struct RateLimiter {
    rate: f64,
    window_secs: f64,
    state: StdMutex<(f64, f64)>,
}

impl RateLimiter {
    pub fn new(rate: f64, window_secs: f64) -> Self {
        Self {
            rate,
            window_secs: window_secs.max(f64::MIN_POSITIVE),
            state: StdMutex::new((rate, now_seconds())),
        }
    }

    pub fn is_allowed(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (tokens, last_refill) = &mut *state;
        let now = now_seconds();
        let elapsed = (now - *last_refill).max(0.0);
        *tokens = (*tokens + elapsed * (self.rate / self.window_secs)).min(self.rate);
        *last_refill = now;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Auth-attempt lockout, scoped to one connection's lifetime
/// (`collabkit/server.py::AuthRateLimiter`, keyed there by websocket id and
/// cleaned up when the connection closes — here that lifetime is simply
/// the `Session`'s own lifetime, so no separate cleanup pass is needed).
struct AuthAttemptState {
    attempts: u32,
    lockout_until: Option<f64>,
}

pub struct AuthRateLimiter {
    max_attempts: u32,
    lockout_secs: f64,
    state: StdMutex<AuthAttemptState>,
}

impl AuthRateLimiter {
    pub fn new(max_attempts: u32, lockout_secs: f64) -> Self {
        Self {
            max_attempts,
            lockout_secs,
            state: StdMutex::new(AuthAttemptState {
                attempts: 0,
                lockout_until: None,
            }),
        }
    }

    pub fn is_allowed(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.lockout_until.map(|until| now_seconds() >= until).unwrap_or(true)
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.attempts += 1;
        if state.attempts >= self.max_attempts {
            state.lockout_until = Some(now_seconds() + self.lockout_secs);
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.attempts = 0;
        state.lockout_until = None;
    }
}

/// Cross-connection bookkeeping that can't live on a single `Session`:
/// per-user connection counts and the single-sharer-per-room screenshare
/// invariant (spec §4.9).
#[derive(Default)]
pub struct ConnectionRegistry {
    user_connections: Mutex<HashMap<String, HashSet<String>>>,
    screen_sharers: Mutex<HashMap<String, String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check-and-commit a new connection for `user_id` against
    /// `max_connections`. Returns `false` (and does not register) if the
    /// cap would be exceeded.
    pub async fn try_register(&self, user_id: &str, connection_id: &str, max_connections: usize) -> bool {
        let mut conns = self.user_connections.lock().await;
        let set = conns.entry(user_id.to_string()).or_default();
        if set.len() >= max_connections {
            return false;
        }
        set.insert(connection_id.to_string());
        true
    }

    pub async fn unregister(&self, user_id: &str, connection_id: &str) {
        let mut conns = self.user_connections.lock().await;
        if let Some(set) = conns.get_mut(user_id) {
            set.remove(connection_id);
            if set.is_empty() {
                conns.remove(user_id);
            }
        }
    }

    /// Claim the screenshare slot for `room_id`. Fails with the current
    /// sharer's id if someone else already holds it.
    pub async fn try_start_screenshare(&self, room_id: &str, user_id: &str) -> Result<(), String> {
        let mut sharers = self.screen_sharers.lock().await;
        match sharers.get(room_id) {
            Some(existing) if existing != user_id => Err(existing.clone()),
            _ => {
                sharers.insert(room_id.to_string(), user_id.to_string());
                Ok(())
            }
        }
    }

    /// Release the slot if `user_id` currently holds it.
    pub async fn stop_screenshare(&self, room_id: &str, user_id: &str) -> bool {
        let mut sharers = self.screen_sharers.lock().await;
        if sharers.get(room_id).map(|s| s.as_str()) == Some(user_id) {
            sharers.remove(room_id);
            true
        } else {
            false
        }
    }

    pub async fn current_sharer(&self, room_id: &str) -> Option<String> {
        self.screen_sharers.lock().await.get(room_id).cloned()
    }
}

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn next_connection_id() -> String {
    format!("conn-{}", CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Per-connection state: identity, joined rooms, and the two rate
/// limiters that gate this connection specifically.
pub struct Session {
    pub connection_id: String,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    user: Mutex<User>,
    auth_user: Mutex<Option<AuthUser>>,
    joined_rooms: Mutex<HashSet<String>>,
    pub rate_limiter: RateLimiter,
    pub auth_rate_limiter: AuthRateLimiter,
}

impl Session {
    pub fn new(sender: mpsc::UnboundedSender<ServerMessage>, config: &Config) -> Self {
        Self {
            connection_id: next_connection_id(),
            sender,
            user: Mutex::new(User::anonymous()),
            auth_user: Mutex::new(None),
            joined_rooms: Mutex::new(HashSet::new()),
            rate_limiter: RateLimiter::new(config.rate_limit, config.rate_limit_window_secs),
            auth_rate_limiter: AuthRateLimiter::new(config.auth_max_attempts, config.auth_lockout_secs),
        }
    }

    pub async fn current_user(&self) -> User {
        self.user.lock().await.clone()
    }

    pub async fn auth_user(&self) -> Option<AuthUser> {
        self.auth_user.lock().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth_user.lock().await.is_some()
    }

    async fn set_identity(&self, user: User, auth_user: Option<AuthUser>) {
        *self.user.lock().await = user;
        *self.auth_user.lock().await = auth_user;
    }

    async fn mark_joined(&self, room_id: &str) {
        self.joined_rooms.lock().await.insert(room_id.to_string());
    }

    async fn mark_left(&self, room_id: &str) {
        self.joined_rooms.lock().await.remove(room_id);
    }

    async fn is_joined(&self, room_id: &str) -> bool {
        self.joined_rooms.lock().await.contains(room_id)
    }

    pub async fn joined_room_ids(&self) -> Vec<String> {
        self.joined_rooms.lock().await.iter().cloned().collect()
    }

    pub fn send(&self, msg: ServerMessage) {
        let _ = self.sender.send(msg);
    }

    fn send_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.send(ServerMessage::error(code, message));
    }
}

/// Everything shared across every connection: rooms, auth, storage,
/// permissions, config (spec's "protocol dispatcher" component, C7).
pub struct Dispatcher {
    pub rooms: Arc<RoomManager>,
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Option<Arc<dyn StorageBackend>>,
    pub permissions: Mutex<PermissionManager>,
    pub config: Config,
    pub connections: ConnectionRegistry,
}

impl Dispatcher {
    pub fn new(rooms: Arc<RoomManager>, auth: Arc<dyn AuthProvider>, storage: Option<Arc<dyn StorageBackend>>, config: Config) -> Self {
        Self {
            rooms,
            auth,
            storage,
            permissions: Mutex::new(PermissionManager::new()),
            config,
            connections: ConnectionRegistry::new(),
        }
    }

    async fn check_permission(&self, user_id: &str, room_id: &str, permission: Permission) -> bool {
        self.permissions.lock().await.check_permission(user_id, &format!("room:{room_id}"), permission)
    }

    /// Dispatch one parsed client message for `session`, mutating shared
    /// state and pushing any direct reply onto `session`'s own channel.
    /// Broadcasts to other members go through `Room::broadcast` directly.
    pub async fn handle_message(&self, session: &Session, message: ClientMessage) {
        match message {
            ClientMessage::Join { room_id, token, user_info } => self.handle_join(session, room_id, token, user_info).await,
            ClientMessage::Leave { room_id } => self.handle_leave(session, &room_id).await,
            ClientMessage::Operation { room_id, operation } => self.handle_operation(session, room_id, operation).await,
            ClientMessage::StateUpdate { room_id, path, value } => self.handle_state_update(session, room_id, path, value).await,
            ClientMessage::SyncRequest { room_id, since_timestamp, .. } => self.handle_sync_request(session, room_id, since_timestamp).await,
            ClientMessage::Call {
                room_id,
                call_id,
                function_name,
                args,
                kwargs,
            } => self.handle_call(session, room_id, call_id, function_name, args, kwargs).await,
            ClientMessage::Presence { room_id, data } => self.handle_presence(session, room_id, data).await,
            ClientMessage::Ping { .. } => session.send(ServerMessage::Pong { timestamp: now_seconds() }),
            ClientMessage::Auth { token } => self.handle_auth(session, token).await,
            ClientMessage::ScreenshareStart { room_id, share_name } => self.handle_screenshare_start(session, room_id, share_name).await,
            ClientMessage::ScreenshareStop { room_id } => self.handle_screenshare_stop(session, room_id).await,
            ClientMessage::RtcOffer { room_id, target_user_id, sdp } => {
                self.relay(&room_id.clone(), &target_user_id, ServerMessage::RtcOffer {
                    room_id,
                    from_user_id: session.current_user().await.id,
                    sdp,
                })
                .await
            }
            ClientMessage::RtcAnswer { room_id, target_user_id, sdp } => {
                self.relay(&room_id.clone(), &target_user_id, ServerMessage::RtcAnswer {
                    room_id,
                    from_user_id: session.current_user().await.id,
                    sdp,
                })
                .await
            }
            ClientMessage::RtcIceCandidate {
                room_id,
                target_user_id,
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => {
                self.relay(&room_id.clone(), &target_user_id, ServerMessage::RtcIceCandidate {
                    room_id,
                    from_user_id: session.current_user().await.id,
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                })
                .await
            }
            ClientMessage::RemoteControlRequest { room_id, target_user_id } => {
                self.relay(&room_id.clone(), &target_user_id, ServerMessage::RemoteControlRequest {
                    room_id,
                    from_user_id: session.current_user().await.id,
                })
                .await
            }
            ClientMessage::RemoteControlResponse { room_id, target_user_id, granted } => {
                self.relay(&room_id.clone(), &target_user_id, ServerMessage::RemoteControlResponse {
                    room_id,
                    from_user_id: session.current_user().await.id,
                    granted,
                })
                .await
            }
        }
    }

    async fn resolve_identity(&self, session: &Session, token: Option<String>, user_info: Option<crate::protocol::UserInfo>) -> Result<User, ErrorCode> {
        if let Some(token) = token {
            match self.auth.authenticate(&token).await {
                Ok(Some(auth_user)) => {
                    let user: User = auth_user.clone().into();
                    session.set_identity(user.clone(), Some(auth_user)).await;
                    return Ok(user);
                }
                Ok(None) => return Err(ErrorCode::AuthenticationFailed),
                Err(_) => return Err(ErrorCode::AuthenticationFailed),
            }
        }
        if session.is_authenticated().await {
            return Ok(session.current_user().await);
        }
        if self.config.require_auth {
            return Err(ErrorCode::AuthenticationFailed);
        }
        if !self.config.allow_anonymous {
            return Err(ErrorCode::AuthenticationFailed);
        }
        let name = user_info.as_ref().and_then(|i| i.name.clone()).unwrap_or_else(|| "Anonymous".to_string());
        let metadata = user_info.map(|i| i.metadata).unwrap_or_else(|| serde_json::json!({}));
        let mut user = User::anonymous();
        user.name = name;
        user.metadata = metadata;
        session.set_identity(user.clone(), None).await;
        Ok(user)
    }

    async fn handle_join(&self, session: &Session, room_id: String, token: Option<String>, user_info: Option<crate::protocol::UserInfo>) {
        let user = match self.resolve_identity(session, token, user_info).await {
            Ok(user) => user,
            Err(code) => return session.send_error(code, "Authentication required to join this room."),
        };

        if !self.rooms.has_room(&room_id).await && !self.config.auto_create_rooms {
            return session.send_error(ErrorCode::RoomNotFound, format!("Room '{room_id}' not found."));
        }

        if !self.check_permission(&user.id, &room_id, Permission::Read).await && self.has_any_role(&user.id, &room_id).await {
            return session.send_error(ErrorCode::PermissionDenied, "You do not have permission to join this room.");
        }

        if !self.connections.try_register(&user.id, &session.connection_id, self.config.max_connections_per_user).await {
            return session.send_error(ErrorCode::PermissionDenied, "Too many concurrent connections for this user.");
        }

        let initial_state = if let Some(storage) = &self.storage {
            if !self.rooms.has_room(&room_id).await {
                storage.load(&room_key(&room_id)).await.ok().flatten().and_then(|v| serde_json::from_value::<RoomSnapshot>(v).ok()).map(|snap| snap.state)
            } else {
                None
            }
        } else {
            None
        };

        let room = self.rooms.get_or_create_room(&room_id, initial_state).await;
        room.add_user(user.clone(), session.connection_id.clone(), session.sender.clone()).await;
        session.mark_joined(&room_id).await;
        self.rooms.presence().join_room(&room_id, &user.id, serde_json::json!({})).await;

        session.send(ServerMessage::Joined {
            room_id: room_id.clone(),
            user_id: user.id.clone(),
            users: room.users().await,
            state: room.value().await,
        });
        room.broadcast(ServerMessage::UserJoined { room_id, user: user.clone() }, Some(&user.id), None).await;
    }

    /// Cheap stand-in for "has this user been assigned any role at all for
    /// this resource" — `check_permission` alone can't distinguish "no
    /// permission manager configured" (always allow) from "no role
    /// assigned" (always deny) for unconfigured deployments, so a
    /// zero-role user is let through rather than locked out by default.
    async fn has_any_role(&self, user_id: &str, room_id: &str) -> bool {
        self.permissions.lock().await.get_role(user_id, &format!("room:{room_id}")).is_some()
    }

    async fn handle_leave(&self, session: &Session, room_id: &str) {
        self.leave_room(session, room_id).await;
    }

    async fn leave_room(&self, session: &Session, room_id: &str) {
        let Some(room) = self.rooms.get_room(room_id).await else {
            return;
        };
        let user = session.current_user().await;
        if room.remove_user(&user.id).await.is_none() {
            return;
        }
        session.mark_left(room_id).await;
        self.connections.unregister(&user.id, &session.connection_id).await;
        self.rooms.presence().leave_room(room_id, &user.id).await;

        if self.config.save_on_operation {
            self.persist_room(room_id, &room).await;
        }

        room.broadcast(ServerMessage::UserLeft { room_id: room_id.to_string(), user_id: user.id }, None, None).await;
    }

    async fn persist_room(&self, room_id: &str, room: &crate::room::Room) {
        let Some(storage) = &self.storage else {
            return;
        };
        let snapshot = RoomSnapshot {
            state: room.value().await,
            operations: room.all_operations().await,
        };
        if let Ok(value) = serde_json::to_value(snapshot) {
            let _ = storage.save(&room_key(room_id), value).await;
        }
    }

    async fn handle_operation(&self, session: &Session, room_id: String, operation: crate::protocol::OperationRecord) {
        let Some(room) = self.rooms.get_room(&room_id).await else {
            return session.send_error(ErrorCode::RoomNotFound, format!("Room '{room_id}' not found."));
        };
        let user = session.current_user().await;
        if !session.is_joined(&room_id).await {
            return session.send_error(ErrorCode::InvalidOperation, "Join the room before sending operations.");
        }
        if !self.check_permission(&user.id, &room_id, Permission::Write).await && self.has_any_role(&user.id, &room_id).await {
            return session.send_error(ErrorCode::PermissionDenied, "You do not have write permission in this room.");
        }
        if let Err(e) = operation.validate() {
            return session.send_error(ErrorCode::InvalidOperation, e.to_string());
        }
        let op = operation.into_operation();
        room.apply_operation(op.clone()).await;
        self.rooms.broadcast_operation(&room_id, op, &user.id, true).await;

        if self.config.save_on_operation {
            self.persist_room(&room_id, &room).await;
        }
    }

    /// Legacy path (spec §6): sets a single dotted path with the raw
    /// user id as origin, bypassing the node-id origin tagging that
    /// `operation` messages use.
    async fn handle_state_update(&self, session: &Session, room_id: String, path: Option<String>, value: serde_json::Value) {
        let Some(room) = self.rooms.get_room(&room_id).await else {
            return session.send_error(ErrorCode::RoomNotFound, format!("Room '{room_id}' not found."));
        };
        let user = session.current_user().await;
        if !self.check_permission(&user.id, &room_id, Permission::Write).await && self.has_any_role(&user.id, &room_id).await {
            return session.send_error(ErrorCode::PermissionDenied, "You do not have write permission in this room.");
        }
        let path_segments: Vec<String> = path.unwrap_or_default().split('.').filter(|s| !s.is_empty()).map(str::to_string).collect();
        let op = crate::crdt::Operation::new(user.id.clone(), path_segments, crate::crdt::OpKind::Set, Some(value));
        room.apply_operation(op.clone()).await;
        self.rooms.broadcast_operation(&room_id, op, &user.id, true).await;
    }

    async fn handle_sync_request(&self, session: &Session, room_id: String, since_timestamp: f64) {
        let Some(room) = self.rooms.get_room(&room_id).await else {
            return session.send_error(ErrorCode::RoomNotFound, format!("Room '{room_id}' not found."));
        };
        let user = session.current_user().await;
        if !session.is_joined(&room_id).await {
            return session.send_error(ErrorCode::InvalidOperation, "Join the room before requesting a sync.");
        }
        if !self.check_permission(&user.id, &room_id, Permission::Read).await && self.has_any_role(&user.id, &room_id).await {
            return session.send_error(ErrorCode::PermissionDenied, "You do not have read permission in this room.");
        }
        session.send(ServerMessage::Sync {
            room_id,
            state: room.value().await,
            operations: room.operations_since(since_timestamp).await,
            version_vector: room.version_vector().await,
        });
    }

    async fn handle_call(&self, session: &Session, room_id: String, call_id: String, function_name: String, args: Vec<serde_json::Value>, kwargs: serde_json::Value) {
        if !session.is_joined(&room_id).await {
            return session.send(ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some("Join the room before calling a function.".to_string()),
            });
        }
        let Some(room) = self.rooms.get_room(&room_id).await else {
            return session.send(ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some(format!("Room '{room_id}' not found.")),
            });
        };
        let Some(func) = room.get_function(&function_name).await else {
            return session.send(ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some(format!("Function '{function_name}' not found.")),
            });
        };

        let auth_user = session.auth_user().await;
        if func.requires_auth && auth_user.is_none() {
            return session.send(ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some("This function requires authentication.".to_string()),
            });
        }

        let user = session.current_user().await;
        for perm_name in &func.required_permissions {
            let Some(perm) = Permission::parse(perm_name) else { continue };
            if !self.check_permission(&user.id, &room_id, perm).await {
                return session.send(ServerMessage::CallResult {
                    call_id,
                    success: false,
                    result: None,
                    error: Some(format!("Missing required permission '{perm_name}'.")),
                });
            }
        }

        let timeout = std::time::Duration::from_secs_f64(self.config.function_timeout_secs);
        let call_future = room.call_function(&function_name, args, kwargs, Some(user));
        let outcome = tokio::time::timeout(timeout, call_future).await;

        let reply = match outcome {
            Ok(Ok(Ok(value))) => ServerMessage::CallResult {
                call_id,
                success: true,
                result: Some(value),
                error: None,
            },
            Ok(Ok(Err(_))) | Ok(Err(())) => ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some("Function execution failed.".to_string()),
            },
            Err(_) => ServerMessage::CallResult {
                call_id,
                success: false,
                result: None,
                error: Some("Function execution timeout.".to_string()),
            },
        };
        session.send(reply);
    }

    async fn handle_presence(&self, session: &Session, room_id: String, data: serde_json::Value) {
        if !session.is_joined(&room_id).await {
            return session.send_error(ErrorCode::InvalidOperation, "Join the room before updating presence.");
        }
        let user = session.current_user().await;
        let updated = self.rooms.presence().update_presence(&room_id, &user.id, data, false).await;
        if !updated {
            return;
        }
        if let Some(presence) = self.rooms.presence().get_user_presence(&room_id, &user.id).await {
            if let Some(room) = self.rooms.get_room(&room_id).await {
                room.broadcast(
                    ServerMessage::Presence {
                        room_id,
                        user_id: user.id.clone(),
                        data: presence.data,
                    },
                    Some(&user.id),
                    None,
                )
                .await;
            }
        }
    }

    async fn handle_auth(&self, session: &Session, token: String) {
        if !session.auth_rate_limiter.is_allowed() {
            return session.send_error(ErrorCode::RateLimited, "Too many authentication attempts, try again later.");
        }
        match self.auth.authenticate(&token).await {
            Ok(Some(auth_user)) => {
                session.auth_rate_limiter.record_success();
                let user_id = auth_user.id.clone();
                session.set_identity(auth_user.clone().into(), Some(auth_user)).await;
                session.send(ServerMessage::Authenticated { user_id });
            }
            _ => {
                session.auth_rate_limiter.record_failure();
                session.send_error(ErrorCode::AuthenticationFailed, "Authentication failed.");
            }
        }
    }

    async fn handle_screenshare_start(&self, session: &Session, room_id: String, share_name: Option<String>) {
        let user = session.current_user().await;
        match self.connections.try_start_screenshare(&room_id, &user.id).await {
            Ok(()) => {
                if let Some(room) = self.rooms.get_room(&room_id).await {
                    room.broadcast(
                        ServerMessage::ScreenshareStarted {
                            room_id,
                            user_id: user.id,
                            share_name,
                        },
                        None,
                        None,
                    )
                    .await;
                }
            }
            Err(_existing) => session.send_error(ErrorCode::PermissionDenied, "Another user is already sharing their screen in this room."),
        }
    }

    async fn handle_screenshare_stop(&self, session: &Session, room_id: String) {
        let user = session.current_user().await;
        if !self.connections.stop_screenshare(&room_id, &user.id).await {
            return session.send_error(ErrorCode::PermissionDenied, "You are not the current screen sharer in this room.");
        }
        if let Some(room) = self.rooms.get_room(&room_id).await {
            room.broadcast(ServerMessage::ScreenshareStopped { room_id, user_id: user.id }, None, None).await;
        }
    }

    /// Best-effort direct delivery to one room member (spec §4.9): the
    /// sender is never told whether the target was reachable.
    async fn relay(&self, room_id: &str, target_user_id: &str, msg: ServerMessage) {
        let Some(room) = self.rooms.get_room(room_id).await else {
            return;
        };
        if let Some(sender) = room.sender_for(target_user_id).await {
            let _ = sender.send(msg);
        }
    }

    /// Tear down everything owned by a disconnecting connection: clear any
    /// screenshare it held (broadcasting the stop), then leave every room
    /// it had joined (`collabkit/server.py::_cleanup_connection`).
    pub async fn cleanup_connection(&self, session: &Session) {
        let user = session.current_user().await;
        for room_id in session.joined_room_ids().await {
            if self.connections.stop_screenshare(&room_id, &user.id).await
                && let Some(room) = self.rooms.get_room(&room_id).await
            {
                room.broadcast(
                    ServerMessage::ScreenshareStopped {
                        room_id: room_id.clone(),
                        user_id: user.id.clone(),
                    },
                    None,
                    None,
                )
                .await;
            }
            self.leave_room(session, &room_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_refills_and_caps() {
        let limiter = RateLimiter::new(2.0, 1.0);
        assert!(limiter.is_allowed());
        assert!(limiter.is_allowed());
        assert!(!limiter.is_allowed());
    }

    #[test]
    fn auth_lockout_triggers_after_max_attempts() {
        let limiter = AuthRateLimiter::new(2, 300.0);
        assert!(limiter.is_allowed());
        limiter.record_failure();
        assert!(limiter.is_allowed());
        limiter.record_failure();
        assert!(!limiter.is_allowed());
    }

    #[test]
    fn auth_success_clears_lockout_state() {
        let limiter = AuthRateLimiter::new(1, 300.0);
        limiter.record_failure();
        assert!(!limiter.is_allowed());
        limiter.record_success();
    }

    #[tokio::test]
    async fn connection_registry_enforces_cap() {
        let registry = ConnectionRegistry::new();
        assert!(registry.try_register("u1", "c1", 1).await);
        assert!(!registry.try_register("u1", "c2", 1).await);
        registry.unregister("u1", "c1").await;
        assert!(registry.try_register("u1", "c2", 1).await);
    }

    #[tokio::test]
    async fn screenshare_is_single_sharer_per_room() {
        let registry = ConnectionRegistry::new();
        assert!(registry.try_start_screenshare("r1", "u1").await.is_ok());
        assert!(registry.try_start_screenshare("r1", "u2").await.is_err());
        assert!(!registry.stop_screenshare("r1", "u2").await);
        assert!(registry.stop_screenshare("r1", "u1").await);
        assert!(registry.try_start_screenshare("r1", "u2").await.is_ok());
    }
}
