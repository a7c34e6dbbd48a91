//! Tagged-union client/server message families and the `User` model
//! (spec §3, §6). Structural shape follows the teacher's plain-struct
//! `models.rs`, generalized to a true discriminated union since the
//! wire protocol here is a message envelope, not a REST resource.

pub mod safe_json;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crdt::op::OpKind;
use crate::crdt::Operation;
use crate::errors::ProtocolError;

/// A participant. `metadata` is safe-JSON, validated at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl User {
    pub fn new(id: String, name: String, metadata: serde_json::Value) -> Result<Self, ProtocolError> {
        safe_json::check_len("id", &id, safe_json::MAX_ID_LENGTH)?;
        safe_json::check_len("name", &name, safe_json::MAX_NAME_LENGTH)?;
        safe_json::validate(&metadata, safe_json::MAX_VALUE_SIZE)?;
        Ok(Self { id, name, metadata })
    }

    /// An anonymous user with a random, non-predictable id (spec §4.7).
    pub fn anonymous() -> Self {
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..16];
        Self {
            id: format!("anon-{suffix}"),
            name: "Anonymous".to_string(),
            metadata: default_metadata(),
        }
    }
}

/// The wire shape of an operation inside a `join`/`operation` message.
/// The server discards `ts` and stamps its own receive time on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub origin: String,
    #[serde(default)]
    pub path: Vec<String>,
    pub kind: OpKind,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl OperationRecord {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        // A room's document state is always an LWW-Map (room.rs), which only
        // understands `set`/`delete`; the other `OpKind` variants exist for
        // the counter/set CRDTs and must never reach it.
        if !matches!(self.kind, OpKind::Set | OpKind::Delete) {
            return Err(ProtocolError::UnsupportedOpKind(self.kind));
        }
        crate::crdt::map::validate_path(&self.path)?;
        if let Some(value) = &self.value {
            safe_json::validate(value, safe_json::MAX_VALUE_SIZE)?;
        }
        Ok(())
    }

    pub fn into_operation(self) -> Operation {
        Operation::from_wire(self.id, self.origin, self.path, self.kind, self.value)
    }
}

/// Static error code strings sent to clients (spec §6); never the
/// internal [`crate::errors`] messages, per spec §7's "no internal
/// details cross the wire".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    PermissionDenied,
    RoomNotFound,
    InvalidMessage,
    InvalidOperation,
    FunctionNotFound,
    FunctionError,
    InternalError,
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::RoomNotFound => "room_not_found",
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::InvalidOperation => "invalid_operation",
            ErrorCode::FunctionNotFound => "function_not_found",
            ErrorCode::FunctionError => "function_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        room_id: String,
        token: Option<String>,
        user_info: Option<UserInfo>,
    },
    Leave {
        room_id: String,
    },
    Operation {
        room_id: String,
        operation: OperationRecord,
    },
    StateUpdate {
        room_id: String,
        path: Option<String>,
        value: serde_json::Value,
    },
    SyncRequest {
        room_id: String,
        since_timestamp: f64,
        #[serde(default)]
        version_vector: Option<HashMap<String, f64>>,
    },
    Call {
        room_id: String,
        call_id: String,
        function_name: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
        #[serde(default)]
        kwargs: serde_json::Value,
    },
    Presence {
        room_id: String,
        data: serde_json::Value,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    Auth {
        token: String,
    },
    ScreenshareStart {
        room_id: String,
        #[serde(default)]
        share_name: Option<String>,
    },
    ScreenshareStop {
        room_id: String,
    },
    RtcOffer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    RtcAnswer {
        room_id: String,
        target_user_id: String,
        sdp: String,
    },
    RtcIceCandidate {
        room_id: String,
        target_user_id: String,
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<i64>,
    },
    RemoteControlRequest {
        room_id: String,
        target_user_id: String,
    },
    RemoteControlResponse {
        room_id: String,
        target_user_id: String,
        #[serde(default)]
        granted: Option<bool>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Parse a raw client frame, enforcing the field caps from spec §6 that
/// aren't already expressed as Rust types.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let message: ClientMessage = serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    validate_client_message(&message)?;
    Ok(message)
}

fn validate_client_message(message: &ClientMessage) -> Result<(), ProtocolError> {
    match message {
        ClientMessage::Join { room_id, user_info, .. } => {
            safe_json::check_len("room_id", room_id, safe_json::MAX_ID_LENGTH)?;
            if let Some(info) = user_info {
                if let Some(name) = &info.name {
                    safe_json::check_len("name", name, safe_json::MAX_NAME_LENGTH)?;
                }
                safe_json::validate(&info.metadata, safe_json::MAX_VALUE_SIZE)?;
            }
            Ok(())
        }
        ClientMessage::Operation { room_id, operation } => {
            safe_json::check_len("room_id", room_id, safe_json::MAX_ID_LENGTH)?;
            operation.validate()
        }
        ClientMessage::StateUpdate { room_id, path, value } => {
            safe_json::check_len("room_id", room_id, safe_json::MAX_ID_LENGTH)?;
            if let Some(path) = path {
                safe_json::check_len("path", path, safe_json::MAX_PATH_LENGTH)?;
            }
            safe_json::validate(value, safe_json::MAX_VALUE_SIZE)
        }
        ClientMessage::Call {
            room_id,
            function_name,
            args,
            kwargs,
            ..
        } => {
            safe_json::check_len("room_id", room_id, safe_json::MAX_ID_LENGTH)?;
            if !is_valid_function_name(function_name) {
                return Err(ProtocolError::FieldTooLong {
                    field: "function_name",
                    max: safe_json::MAX_NAME_LENGTH,
                });
            }
            safe_json::check_count("args", args, safe_json::MAX_ARGS_COUNT)?;
            safe_json::validate(kwargs, safe_json::MAX_VALUE_SIZE)
        }
        ClientMessage::Presence { room_id, data } => {
            safe_json::check_len("room_id", room_id, safe_json::MAX_ID_LENGTH)?;
            safe_json::validate(data, safe_json::MAX_PRESENCE_DATA_SIZE)
        }
        ClientMessage::RtcOffer { sdp, .. } | ClientMessage::RtcAnswer { sdp, .. } => {
            safe_json::check_len("sdp", sdp, 65536)
        }
        ClientMessage::RtcIceCandidate { candidate, .. } => safe_json::check_len("candidate", candidate, 4096),
        _ => Ok(()),
    }
}

/// `[A-Za-z_]\w*`, per spec §6's `call` message field.
fn is_valid_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        room_id: String,
        user_id: String,
        users: Vec<User>,
        state: serde_json::Value,
    },
    Operation {
        room_id: String,
        user_id: String,
        operation: Operation,
    },
    Sync {
        room_id: String,
        state: serde_json::Value,
        operations: Vec<Operation>,
        version_vector: HashMap<String, f64>,
    },
    CallResult {
        call_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Presence {
        room_id: String,
        user_id: String,
        data: serde_json::Value,
    },
    UserJoined {
        room_id: String,
        user: User,
    },
    UserLeft {
        room_id: String,
        user_id: String,
    },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    Ping,
    Pong {
        timestamp: f64,
    },
    Authenticated {
        user_id: String,
    },
    ScreenshareStarted {
        room_id: String,
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        share_name: Option<String>,
    },
    ScreenshareStopped {
        room_id: String,
        user_id: String,
    },
    RtcOffer {
        room_id: String,
        from_user_id: String,
        sdp: String,
    },
    RtcAnswer {
        room_id: String,
        from_user_id: String,
        sdp: String,
    },
    RtcIceCandidate {
        room_id: String,
        from_user_id: String,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<i64>,
    },
    RemoteControlRequest {
        room_id: String,
        from_user_id: String,
    },
    RemoteControlResponse {
        room_id: String,
        from_user_id: String,
        granted: Option<bool>,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.as_str(),
            message: message.into(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_message() {
        let raw = r#"{"type":"join","room_id":"r1","token":null}"#;
        let msg = parse_client_message(raw).unwrap();
        assert!(matches!(msg, ClientMessage::Join { room_id, .. } if room_id == "r1"));
    }

    #[test]
    fn rejects_dangerous_path_in_operation() {
        let raw = r#"{"type":"operation","room_id":"r1","operation":{"id":"1","origin":"a","path":["__proto__"],"kind":"set","value":1}}"#;
        assert!(parse_client_message(raw).is_err());
    }

    #[test]
    fn rejects_invalid_function_name() {
        let raw = r#"{"type":"call","room_id":"r1","call_id":"c1","function_name":"123bad","args":[],"kwargs":{}}"#;
        assert!(parse_client_message(raw).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        let raw = r#"{"type":"not_a_real_type"}"#;
        assert!(parse_client_message(raw).is_err());
    }

    #[test]
    fn error_message_uses_static_code_string() {
        let msg = ServerMessage::error(ErrorCode::RoomNotFound, "Room 'x' not found.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "room_not_found");
    }
}
