//! Operation records and version vectors (spec §3, §4.1).
//!
//! Every CRDT in this crate replays a log of [`Operation`]s. The server —
//! never the client — assigns `ts`, which defends against a malicious
//! client inflating its own last-writer-wins priority.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds since the Unix epoch, matching the wire representation used by
/// every timestamp field in the protocol.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs_f64()
}

/// What kind of mutation an [`Operation`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Set,
    Delete,
    Increment,
    Decrement,
    Add,
    Remove,
}

/// A path segment sequence addressing a location inside an [`crate::crdt::map::LwwMap`].
/// The empty sequence addresses the root.
pub type Path = Vec<String>;

/// An immutable, globally-unique mutation record.
///
/// `id` deduplicates retransmitted or merged operations; `origin` names the
/// replica (node id) that authored it; `ts` is assigned by the server on
/// receipt, never trusted from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub ts: f64,
    pub origin: String,
    pub path: Path,
    pub kind: OpKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl Operation {
    /// Construct a new operation with a fresh id and the current server time.
    pub fn new(origin: impl Into<String>, path: Path, kind: OpKind, value: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: now_seconds(),
            origin: origin.into(),
            path,
            kind,
            value,
        }
    }

    /// Rebuild an operation received over the wire, discarding whatever
    /// timestamp the client supplied and stamping the server's receive time
    /// instead (spec §4.1 "server assigns receive-time to every inbound client op").
    pub fn from_wire(id: String, origin: String, path: Path, kind: OpKind, value: Option<serde_json::Value>) -> Self {
        Self {
            id,
            ts: now_seconds(),
            origin,
            path,
            kind,
            value,
        }
    }

    /// Ordering key used by every LWW comparison: later timestamp wins, ties
    /// broken by lexicographic origin comparison (spec §3/§4.1).
    pub fn order_key(&self) -> (f64, &str) {
        (self.ts, self.origin.as_str())
    }
}

/// Compare two (timestamp, origin) pairs under the LWW ordering rule.
pub fn is_newer(ts_a: f64, origin_a: &str, ts_b: f64, origin_b: &str) -> bool {
    if ts_a != ts_b {
        ts_a > ts_b
    } else {
        origin_a > origin_b
    }
}

/// Per-origin high-water timestamp map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionVector {
    timestamps: HashMap<String, f64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, origin: &str, ts: f64) {
        let entry = self.timestamps.entry(origin.to_string()).or_insert(0.0);
        if ts > *entry {
            *entry = ts;
        }
    }

    pub fn get(&self, origin: &str) -> f64 {
        self.timestamps.get(origin).copied().unwrap_or(0.0)
    }

    pub fn merge(&mut self, other: &VersionVector) {
        for (origin, ts) in &other.timestamps {
            self.update(origin, *ts);
        }
    }

    pub fn as_map(&self) -> &HashMap<String, f64> {
        &self.timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_vector_tracks_high_water_mark() {
        let mut vv = VersionVector::new();
        vv.update("a", 5.0);
        vv.update("a", 3.0);
        assert_eq!(vv.get("a"), 5.0);
        vv.update("a", 9.0);
        assert_eq!(vv.get("a"), 9.0);
    }

    #[test]
    fn version_vector_merge_is_pointwise_max() {
        let mut a = VersionVector::new();
        a.update("x", 1.0);
        let mut b = VersionVector::new();
        b.update("x", 2.0);
        b.update("y", 4.0);
        a.merge(&b);
        assert_eq!(a.get("x"), 2.0);
        assert_eq!(a.get("y"), 4.0);
    }

    #[test]
    fn newer_breaks_ties_on_origin() {
        assert!(is_newer(1.0, "b", 1.0, "a"));
        assert!(!is_newer(1.0, "a", 1.0, "b"));
        assert!(is_newer(2.0, "a", 1.0, "z"));
    }

    #[test]
    fn from_wire_discards_client_timestamp() {
        let op = Operation::from_wire(
            "id-1".into(),
            "client-a".into(),
            vec!["x".into()],
            OpKind::Set,
            Some(serde_json::json!(1)),
        );
        // Client ts would have been far in the future if honored.
        assert!(op.ts <= now_seconds());
        assert!(op.ts > 0.0);
    }
}
