//! Typed error enums for each component boundary.
//!
//! Handlers never let these cross the wire directly (spec §7: "no internal
//! details cross the wire") — the session layer maps them to the static
//! [`crate::protocol::ErrorCode`] strings before replying to a client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("unsupported operation kind '{0}' for this CRDT")]
    UnsupportedOp(&'static str),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message exceeds the {limit} byte size cap")]
    TooLarge { limit: usize },
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("value nesting exceeds the maximum depth of {max}")]
    TooDeep { max: usize },
    #[error("value exceeds the {limit} byte size cap")]
    ValueTooLarge { limit: usize },
    #[error("key '{0}' is not allowed")]
    DangerousKey(String),
    #[error("field '{field}' exceeds the maximum length of {max}")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("list field '{field}' exceeds the maximum length of {max}")]
    ListTooLong { field: &'static str, max: usize },
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("operation kind '{0:?}' is not valid on a room's document state")]
    UnsupportedOpKind(crate::crdt::op::OpKind),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token validation failed: {0}")]
    ProviderError(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("function '{0}' not found")]
    FunctionNotFound(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
