//! OR-Set: an observed-remove set where concurrent add and remove of the
//! same value resolve add-wins (spec §4.3). Each `add` is tagged with a
//! unique id; `remove` tombstones the tags it observed at generation time,
//! so a concurrent add the remover never saw survives.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::op::{Operation, OpKind, VersionVector};
use super::Crdt;
use crate::errors::CrdtError;

fn canonical(value: &serde_json::Value) -> String {
    serde_json::to_string(value).expect("serde_json::Value always serializes")
}

pub struct OrSet {
    node_id: String,
    /// canonical value json -> add tags currently attributed to it
    adds: HashMap<String, HashSet<String>>,
    /// tag -> the value it added, for reconstruction
    tag_values: HashMap<String, serde_json::Value>,
    tombstoned_tags: HashSet<String>,
    operations: Vec<Operation>,
    version_vector: VersionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrSetState {
    operations: Vec<Operation>,
}

impl OrSet {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            adds: HashMap::new(),
            tag_values: HashMap::new(),
            tombstoned_tags: HashSet::new(),
            operations: Vec::new(),
            version_vector: VersionVector::new(),
        }
    }

    fn has_seen(&self, op: &Operation) -> bool {
        self.operations.iter().any(|existing| existing.id == op.id)
    }

    fn apply_add(&mut self, tag: String, value: serde_json::Value) {
        self.adds.entry(canonical(&value)).or_default().insert(tag.clone());
        self.tag_values.insert(tag, value);
    }

    fn apply_remove(&mut self, tags: Vec<String>) {
        for tag in tags {
            self.tombstoned_tags.insert(tag);
        }
    }

    /// Add a value to the set, authored by this replica.
    pub fn add(&mut self, value: serde_json::Value) -> Operation {
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Add, Some(value));
        self.apply(op.clone());
        op
    }

    /// Remove a value, tombstoning exactly the add-tags this replica has
    /// observed for it. A concurrent add this replica hasn't seen yet is
    /// untouched and will survive the merge (add-wins).
    pub fn remove(&mut self, value: &serde_json::Value) -> Option<Operation> {
        let key = canonical(value);
        let observed: Vec<String> = self
            .adds
            .get(&key)?
            .iter()
            .filter(|tag| !self.tombstoned_tags.contains(*tag))
            .cloned()
            .collect();
        if observed.is_empty() {
            return None;
        }
        let payload = serde_json::json!({ "value": value, "tags": observed });
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Remove, Some(payload));
        self.apply(op.clone());
        Some(op)
    }

    pub fn contains(&self, value: &serde_json::Value) -> bool {
        let key = canonical(value);
        self.adds
            .get(&key)
            .map(|tags| tags.iter().any(|t| !self.tombstoned_tags.contains(t)))
            .unwrap_or(false)
    }
}

impl Crdt for OrSet {
    type Value = Vec<serde_json::Value>;
    type State = OrSetState;

    fn apply(&mut self, op: Operation) -> bool {
        if self.has_seen(&op) {
            return false;
        }
        match op.kind {
            OpKind::Add => {
                let value = op.value.clone().unwrap_or(serde_json::Value::Null);
                self.apply_add(op.id.clone(), value);
            }
            OpKind::Remove => {
                let payload = op.value.clone().unwrap_or(serde_json::Value::Null);
                let tags: Vec<String> = payload
                    .get("tags")
                    .and_then(|t| t.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                self.apply_remove(tags);
            }
            other => panic!(
                "{}",
                CrdtError::UnsupportedOp(match other {
                    OpKind::Set => "set",
                    OpKind::Delete => "delete",
                    OpKind::Increment => "increment",
                    OpKind::Decrement => "decrement",
                    _ => unreachable!(),
                })
            ),
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
        self.adds
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| !self.tombstoned_tags.contains(t)))
            .filter_map(|(key, _)| serde_json::from_str(key).ok())
            .collect()
    }

    fn operations_since(&self, since: f64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.ts > since).cloned().collect()
    }

    fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    fn state(&self) -> Self::State {
        OrSetState {
            operations: self.operations.clone(),
        }
    }

    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self {
        let mut set = Self::new(node_id);
        for op in state.operations {
            set.apply(op);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_contains() {
        let mut set = OrSet::new("node-a");
        set.add(serde_json::json!("x"));
        assert!(set.contains(&serde_json::json!("x")));
    }

    #[test]
    fn remove_drops_observed_value() {
        let mut set = OrSet::new("node-a");
        set.add(serde_json::json!("x"));
        set.remove(&serde_json::json!("x"));
        assert!(!set.contains(&serde_json::json!("x")));
    }

    #[test]
    fn concurrent_add_wins_over_remove() {
        let mut a = OrSet::new("node-a");
        let add1 = a.add(serde_json::json!("x"));

        let mut b = OrSet::from_state("node-b", a.state());
        // b observes the first add and removes it.
        let remove_op = b.remove(&serde_json::json!("x")).unwrap();

        // Meanwhile replica a adds "x" again, concurrently, without having
        // seen b's remove.
        let add2 = a.add(serde_json::json!("x"));

        // Merge both directions.
        a.apply(remove_op);
        b.apply(add2.clone());
        let _ = add1;

        assert!(a.contains(&serde_json::json!("x")));
        assert!(b.contains(&serde_json::json!("x")));
    }

    #[test]
    fn remove_of_unknown_value_is_noop() {
        let mut set = OrSet::new("node-a");
        assert!(set.remove(&serde_json::json!("missing")).is_none());
    }
}
