//! LWW-Register: a single value resolved by last-writer-wins (spec §3).

use serde::{Deserialize, Serialize};

use super::op::{is_newer, Operation, OpKind, VersionVector};
use super::Crdt;
use crate::errors::CrdtError;

#[derive(Debug, Clone)]
struct Current {
    value: Option<serde_json::Value>,
    ts: f64,
    origin: String,
}

/// Last-writer-wins register. Holds one value; concurrent sets are resolved
/// by `(ts, origin)` ordering, ties broken by origin string comparison.
pub struct LwwRegister {
    node_id: String,
    current: Current,
    operations: Vec<Operation>,
    version_vector: VersionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LwwRegisterState {
    pub value: Option<serde_json::Value>,
    pub ts: f64,
    pub origin: String,
    pub operations: Vec<Operation>,
}

impl LwwRegister {
    pub fn new(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            current: Current {
                value: None,
                ts: 0.0,
                origin: node_id.clone(),
            },
            node_id,
            operations: Vec::new(),
            version_vector: VersionVector::new(),
        }
    }

    fn has_seen(&self, op: &Operation) -> bool {
        self.operations.iter().any(|existing| existing.id == op.id)
    }

    fn record(&mut self, op: Operation) {
        self.version_vector.update(&op.origin, op.ts);
        self.operations.push(op);
    }

    /// Build and apply a `set` operation authored by this replica.
    pub fn set(&mut self, value: serde_json::Value) -> Operation {
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Set, Some(value));
        self.apply(op.clone());
        op
    }
}

impl Crdt for LwwRegister {
    type Value = Option<serde_json::Value>;
    type State = LwwRegisterState;

    fn apply(&mut self, op: Operation) -> bool {
        if self.has_seen(&op) {
            return false;
        }
        if op.kind != OpKind::Set {
            panic!("{}", CrdtError::UnsupportedOp("LwwRegister only supports 'set'"));
        }
        if is_newer(op.ts, &op.origin, self.current.ts, &self.current.origin) {
            self.current = Current {
                value: op.value.clone(),
                ts: op.ts,
                origin: op.origin.clone(),
            };
        }
        self.record(op);
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
        self.current.value.clone()
    }

    fn operations_since(&self, since: f64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.ts > since).cloned().collect()
    }

    fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    fn state(&self) -> Self::State {
        LwwRegisterState {
            value: self.current.value.clone(),
            ts: self.current.ts,
            origin: self.current.origin.clone(),
            operations: self.operations.clone(),
        }
    }

    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self {
        let mut reg = Self::new(node_id);
        reg.current = Current {
            value: state.value,
            ts: state.ts,
            origin: state.origin,
        };
        reg.operations = state.operations;
        for op in &reg.operations {
            reg.version_vector.update(&op.origin, op.ts);
        }
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_timestamp_wins() {
        let mut reg = LwwRegister::new("node-a");
        reg.apply(Operation::from_wire("1".into(), "a".into(), vec![], OpKind::Set, Some(serde_json::json!(1))));
        let mut op2 = Operation::from_wire("2".into(), "b".into(), vec![], OpKind::Set, Some(serde_json::json!(2)));
        op2.ts = reg.current.ts + 1.0;
        reg.apply(op2);
        assert_eq!(reg.value(), Some(serde_json::json!(2)));
    }

    #[test]
    fn duplicate_apply_is_idempotent() {
        let mut reg = LwwRegister::new("node-a");
        let op = Operation::from_wire("1".into(), "a".into(), vec![], OpKind::Set, Some(serde_json::json!(1)));
        assert!(reg.apply(op.clone()));
        assert!(!reg.apply(op));
    }

    #[test]
    fn round_trip_preserves_value_and_ops() {
        let mut reg = LwwRegister::new("node-a");
        reg.apply(Operation::from_wire("1".into(), "a".into(), vec![], OpKind::Set, Some(serde_json::json!("x"))));
        let restored = LwwRegister::from_state("node-a", reg.state());
        assert_eq!(restored.value(), reg.value());
        assert_eq!(restored.operations_since(0.0).len(), reg.operations_since(0.0).len());
    }

    #[test]
    fn tie_breaks_on_origin() {
        let mut reg = LwwRegister::new("node-a");
        let mut op_a = Operation::from_wire("1".into(), "a".into(), vec![], OpKind::Set, Some(serde_json::json!(1)));
        let mut op_b = Operation::from_wire("2".into(), "b".into(), vec![], OpKind::Set, Some(serde_json::json!(2)));
        op_a.ts = 100.0;
        op_b.ts = 100.0;
        reg.apply(op_a);
        reg.apply(op_b);
        assert_eq!(reg.value(), Some(serde_json::json!(2)));
    }
}
