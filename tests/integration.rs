//! End-to-end scenarios exercised against the `Dispatcher` directly (no
//! live socket): each `Session` here stands in for one WebSocket
//! connection, with its outgoing channel read back like a client would.
//! One file per topic, sharing fixtures from `common`.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/auth.rs"]
mod auth;
#[path = "integration/crdt.rs"]
mod crdt;
#[path = "integration/protocol.rs"]
mod protocol;
#[path = "integration/rooms.rs"]
mod rooms;
#[path = "integration/signaling.rs"]
mod signaling;
