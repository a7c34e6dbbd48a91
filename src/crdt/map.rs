//! LWW-Map: a path-keyed map where nested objects are flattened to leaf
//! paths and each leaf resolves independently by last-writer-wins (spec
//! §4.2). Deletes are tombstones so a late-arriving stale `set` can't
//! resurrect a deleted subtree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::op::{is_newer, Operation, OpKind, Path, VersionVector};
use super::Crdt;
use crate::errors::ProtocolError;

/// Path segments rejected at decode time (spec §4.2): these would shadow
/// prototype internals if ever reflected back into an object. The broader
/// "any key starting with `_`" rule and nesting/size caps are a value-shape
/// concern handled by `protocol::safe_json`, not a path concern.
pub const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype", "__class__"];

/// Reject a path containing an empty segment or a dangerous segment.
pub fn validate_path(path: &Path) -> Result<(), ProtocolError> {
    for segment in path {
        if segment.is_empty() || DANGEROUS_KEYS.contains(&segment.as_str()) {
            return Err(ProtocolError::DangerousKey(segment.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: serde_json::Value,
    ts: f64,
    origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tombstone {
    ts: f64,
    origin: String,
}

/// Records what a `set` or `delete` at `path` did to the subtree rooted
/// there, so materialization can decide *later* whether a given descendant
/// should still be visible — instead of deleting "vanished" children as a
/// one-time side effect when the op is applied (see `is_masked`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Mask {
    ts: f64,
    origin: String,
    /// Leaf paths this write actually touched. A `delete` has an empty
    /// `kept` (nothing under `path` survives it); a `set` keeps exactly the
    /// leaves `flatten` produced for the value it wrote.
    kept: std::collections::HashSet<Path>,
}

pub struct LwwMap {
    node_id: String,
    entries: HashMap<Path, Entry>,
    tombstones: HashMap<Path, Tombstone>,
    masks: HashMap<Path, Mask>,
    operations: Vec<Operation>,
    version_vector: VersionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwwMapState {
    entries: Vec<(Path, Entry)>,
    tombstones: Vec<(Path, Tombstone)>,
    masks: Vec<(Path, Mask)>,
    operations: Vec<Operation>,
}

fn under_subtree(candidate: &[String], of: &[String]) -> bool {
    candidate.len() >= of.len() && candidate[..of.len()] == of[..]
}

/// Flatten a nested object into `(leaf_path, leaf_value)` pairs. An empty
/// object is treated as a leaf so `{}` doesn't silently vanish.
fn flatten(path: Path, value: serde_json::Value) -> Vec<(Path, serde_json::Value)> {
    match value {
        serde_json::Value::Object(map) if !map.is_empty() => map
            .into_iter()
            .flat_map(|(k, v)| {
                let mut child = path.clone();
                child.push(k);
                flatten(child, v)
            })
            .collect(),
        other => vec![(path, other)],
    }
}

fn insert_nested(obj: &mut serde_json::Map<String, serde_json::Value>, path: &[String], value: serde_json::Value) {
    if path.len() == 1 {
        obj.insert(path[0].clone(), value);
        return;
    }
    let child = obj
        .entry(path[0].clone())
        .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    if !child.is_object() {
        *child = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(child_map) = child {
        insert_nested(child_map, &path[1..], value);
    }
}

impl LwwMap {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: HashMap::new(),
            tombstones: HashMap::new(),
            masks: HashMap::new(),
            operations: Vec::new(),
            version_vector: VersionVector::new(),
        }
    }

    fn has_seen(&self, op: &Operation) -> bool {
        self.operations.iter().any(|existing| existing.id == op.id)
    }

    fn existing_ts_origin(&self, path: &Path) -> (f64, String) {
        if let Some(entry) = self.entries.get(path) {
            return (entry.ts, entry.origin.clone());
        }
        if let Some(tomb) = self.tombstones.get(path) {
            return (tomb.ts, tomb.origin.clone());
        }
        (0.0, self.node_id.clone())
    }

    fn apply_leaf(&mut self, path: Path, value: Option<serde_json::Value>, ts: f64, origin: &str) {
        let (existing_ts, existing_origin) = self.existing_ts_origin(&path);
        if !is_newer(ts, origin, existing_ts, &existing_origin) {
            return;
        }
        match value {
            Some(v) => {
                self.tombstones.remove(&path);
                self.entries.insert(
                    path,
                    Entry {
                        value: v,
                        ts,
                        origin: origin.to_string(),
                    },
                );
            }
            None => {
                self.entries.remove(&path);
                self.tombstones.insert(
                    path,
                    Tombstone {
                        ts,
                        origin: origin.to_string(),
                    },
                );
            }
        }
    }

    fn apply_set(&mut self, path: Path, value: serde_json::Value, ts: f64, origin: &str) {
        let leaves = flatten(path.clone(), value);
        let kept: std::collections::HashSet<Path> = leaves.iter().map(|(p, _)| p.clone()).collect();
        for (leaf_path, leaf_value) in leaves {
            self.apply_leaf(leaf_path, Some(leaf_value), ts, origin);
        }
        self.record_mask(path, kept, ts, origin);
    }

    fn apply_delete(&mut self, path: Path, ts: f64, origin: &str) {
        self.apply_leaf(path.clone(), None, ts, origin);
        self.record_mask(path, std::collections::HashSet::new(), ts, origin);
    }

    /// Keep only the LWW-winning mask per path. A leaf is later hidden by
    /// whichever ancestor mask is both newer than the leaf and didn't keep
    /// it — a pure function of the stored records, so it gives the same
    /// answer regardless of the order ops were applied in.
    fn record_mask(&mut self, path: Path, kept: std::collections::HashSet<Path>, ts: f64, origin: &str) {
        let replace = match self.masks.get(&path) {
            Some(existing) => is_newer(ts, origin, existing.ts, &existing.origin),
            None => true,
        };
        if replace {
            self.masks.insert(
                path,
                Mask {
                    ts,
                    origin: origin.to_string(),
                    kept,
                },
            );
        }
    }

    /// True if some ancestor of `path` was last (re)written or deleted more
    /// recently than `(ts, origin)` without keeping `path` among its leaves.
    fn is_masked(&self, path: &Path, ts: f64, origin: &str) -> bool {
        for depth in 0..path.len() {
            let ancestor = &path[..depth];
            if let Some(mask) = self.masks.get(ancestor) {
                if !mask.kept.contains(path) && is_newer(mask.ts, &mask.origin, ts, origin) {
                    return true;
                }
            }
        }
        false
    }

    /// Build and apply a `set` operation authored by this replica.
    pub fn set(&mut self, path: Path, value: serde_json::Value) -> Result<Operation, ProtocolError> {
        validate_path(&path)?;
        let op = Operation::new(self.node_id.clone(), path, OpKind::Set, Some(value));
        self.apply(op.clone());
        Ok(op)
    }

    /// Build and apply a `delete` operation authored by this replica.
    pub fn delete(&mut self, path: Path) -> Result<Operation, ProtocolError> {
        validate_path(&path)?;
        let op = Operation::new(self.node_id.clone(), path, OpKind::Delete, None);
        self.apply(op.clone());
        Ok(op)
    }

    /// Read the resolved value at `path`: a scalar if it's a live leaf, the
    /// reconstructed subtree of live descendants if it's an internal path,
    /// or `None` if nothing live exists there or below.
    pub fn get(&self, path: &Path) -> Option<serde_json::Value> {
        if let Some(entry) = self.entries.get(path) {
            if !self.is_masked(path, entry.ts, &entry.origin) {
                return Some(entry.value.clone());
            }
            return None;
        }
        let mut root = serde_json::Map::new();
        let mut found = false;
        for (candidate, entry) in &self.entries {
            if candidate.len() > path.len() && under_subtree(candidate, path) && !self.is_masked(candidate, entry.ts, &entry.origin) {
                found = true;
                insert_nested(&mut root, &candidate[path.len()..], entry.value.clone());
            }
        }
        found.then_some(serde_json::Value::Object(root))
    }

    /// Per-origin high-water timestamps, for `sync_request` replies (spec §6).
    pub fn version_vector(&self) -> HashMap<String, f64> {
        self.version_vector.as_map().clone()
    }
}

impl Crdt for LwwMap {
    type Value = serde_json::Value;
    type State = LwwMapState;

    fn apply(&mut self, op: Operation) -> bool {
        if self.has_seen(&op) {
            return false;
        }
        match op.kind {
            OpKind::Set => self.apply_set(op.path.clone(), op.value.clone().unwrap_or(serde_json::Value::Null), op.ts, &op.origin),
            OpKind::Delete => self.apply_delete(op.path.clone(), op.ts, &op.origin),
            // Counter/set-only op kinds never reach a map: `OperationRecord::validate`
            // rejects them before an `Operation` is built. Ignore rather than panic so
            // a bug upstream can't be turned into a remotely triggerable crash.
            _ => {
                log::warn!("LwwMap::apply received unsupported op kind {:?}, ignoring", op.kind);
                return false;
            }
        }
        self.version_vector.update(&op.origin, op.ts);
        self.operations.push(op);
        true
    }

    fn merge(&mut self, other: &Self) {
        for op in &other.operations {
            if !self.has_seen(op) {
                self.apply(op.clone());
            }
        }
    }

    fn value(&self) -> Self::Value {
        let mut root = serde_json::Map::new();
        for (path, entry) in &self.entries {
            if path.is_empty() {
                continue;
            }
            if self.is_masked(path, entry.ts, &entry.origin) {
                continue;
            }
            insert_nested(&mut root, path, entry.value.clone());
        }
        serde_json::Value::Object(root)
    }

    fn operations_since(&self, since: f64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.ts > since).cloned().collect()
    }

    fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    fn state(&self) -> Self::State {
        LwwMapState {
            entries: self.entries.iter().map(|(p, e)| (p.clone(), e.clone())).collect(),
            tombstones: self.tombstones.iter().map(|(p, t)| (p.clone(), t.clone())).collect(),
            masks: self.masks.iter().map(|(p, m)| (p.clone(), m.clone())).collect(),
            operations: self.operations.clone(),
        }
    }

    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self {
        let mut map = Self::new(node_id);
        map.entries = state.entries.into_iter().collect();
        map.tombstones = state.tombstones.into_iter().collect();
        map.masks = state.masks.into_iter().collect();
        map.operations = state.operations;
        for op in &map.operations {
            map.version_vector.update(&op.origin, op.ts);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_object_flattens_to_leaves() {
        let mut map = LwwMap::new("node-a");
        map.set(vec!["user".into()], serde_json::json!({"name": "ada", "age": 30})).unwrap();
        assert_eq!(map.get(&vec!["user".into(), "name".into()]), Some(serde_json::json!("ada")));
        assert_eq!(map.get(&vec!["user".into(), "age".into()]), Some(serde_json::json!(30)));
    }

    #[test]
    fn delete_tombstones_and_blocks_stale_resurrection() {
        let mut map = LwwMap::new("node-a");
        let set_op = map.set(vec!["k".into()], serde_json::json!("v")).unwrap();
        map.delete(vec!["k".into()]).unwrap();
        assert_eq!(map.get(&vec!["k".into()]), None);

        let mut stale = set_op;
        stale.id = "stale-replay".into();
        stale.ts -= 1000.0;
        map.apply(stale);
        assert_eq!(map.get(&vec!["k".into()]), None);
    }

    #[test]
    fn set_replacing_object_clears_vanished_children() {
        let mut map = LwwMap::new("node-a");
        map.set(vec!["cfg".into()], serde_json::json!({"a": 1, "b": 2})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        map.set(vec!["cfg".into()], serde_json::json!({"a": 3})).unwrap();
        assert_eq!(map.get(&vec!["cfg".into(), "a".into()]), Some(serde_json::json!(3)));
        assert_eq!(map.get(&vec!["cfg".into(), "b".into()]), None);
    }

    /// Two object-sets at the same path must converge to the same value
    /// regardless of apply order (spec §8 "Merge commutativity").
    #[test]
    fn object_set_replacement_is_commutative_regardless_of_apply_order() {
        let op1 = Operation::new("origin-a".to_string(), vec!["cfg".into()], OpKind::Set, Some(serde_json::json!({"a": 1, "b": 2})));
        let mut op2 = Operation::new("origin-b".to_string(), vec!["cfg".into()], OpKind::Set, Some(serde_json::json!({"a": 3})));
        op2.ts = op1.ts + 10.0;

        let mut forward = LwwMap::new("node-a");
        forward.apply(op1.clone());
        forward.apply(op2.clone());

        let mut backward = LwwMap::new("node-b");
        backward.apply(op2);
        backward.apply(op1);

        let expected = serde_json::json!({"cfg": {"a": 3}});
        assert_eq!(forward.value(), expected);
        assert_eq!(backward.value(), expected);
    }

    /// A delete that lands before any child exists must still mask a
    /// later-merged (but earlier-timestamped) write under it, in both
    /// apply orders (spec §4.2's tombstone-prefix rule).
    #[test]
    fn delete_masks_descendant_written_after_it_arrives_regardless_of_order() {
        let mut delete_op = Operation::new("origin-a".to_string(), vec!["a".into()], OpKind::Delete, None);
        let set_op = Operation::new("origin-b".to_string(), vec!["a".into(), "b".into()], OpKind::Set, Some(serde_json::json!("v")));
        delete_op.ts = set_op.ts + 10.0;

        let mut forward = LwwMap::new("node-a");
        forward.apply(delete_op.clone());
        forward.apply(set_op.clone());

        let mut backward = LwwMap::new("node-b");
        backward.apply(set_op);
        backward.apply(delete_op);

        assert_eq!(forward.get(&vec!["a".into(), "b".into()]), None);
        assert_eq!(backward.get(&vec!["a".into(), "b".into()]), None);
    }

    #[test]
    fn get_reconstructs_subtree_of_live_descendants() {
        let mut map = LwwMap::new("node-a");
        map.set(vec!["user".into()], serde_json::json!({"name": "ada", "age": 30})).unwrap();
        assert_eq!(map.get(&vec!["user".into()]), Some(serde_json::json!({"name": "ada", "age": 30})));
        assert_eq!(map.get(&vec!["missing".into()]), None);
    }

    #[test]
    fn validate_path_rejects_dangerous_segments() {
        assert!(validate_path(&vec!["__proto__".into()]).is_err());
        assert!(validate_path(&vec!["a".into(), "constructor".into()]).is_err());
        assert!(validate_path(&vec!["ok".into()]).is_ok());
    }

    #[test]
    fn round_trip_state_preserves_value() {
        let mut map = LwwMap::new("node-a");
        map.set(vec!["x".into()], serde_json::json!(1)).unwrap();
        let restored = LwwMap::from_state("node-a", map.state());
        assert_eq!(restored.value(), map.value());
    }
}
