//! Grow-only and positive-negative counters (spec §4.3). Each replica tracks
//! its own contribution per origin; merging is pointwise-max-by-construction
//! since every operation is applied at most once (deduplicated by id) and
//! amounts are never negative for a `GCounter`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::op::{Operation, OpKind, VersionVector};
use super::Crdt;
use crate::errors::CrdtError;

fn amount(op: &Operation) -> f64 {
    op.value.as_ref().and_then(|v| v.as_f64()).unwrap_or(1.0)
}

/// Grow-only counter: increments only, value is the sum across all origins.
pub struct GCounter {
    node_id: String,
    counts: HashMap<String, f64>,
    operations: Vec<Operation>,
    version_vector: VersionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterState {
    operations: Vec<Operation>,
}

impl GCounter {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            counts: HashMap::new(),
            operations: Vec::new(),
            version_vector: VersionVector::new(),
        }
    }

    fn has_seen(&self, op: &Operation) -> bool {
        self.operations.iter().any(|existing| existing.id == op.id)
    }

    /// Increment this replica's contribution by `amount` (must be >= 0).
    pub fn increment(&mut self, amount: f64) -> Operation {
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Increment, Some(serde_json::json!(amount)));
        self.apply(op.clone());
        op
    }

    pub fn count_for(&self, origin: &str) -> f64 {
        self.counts.get(origin).copied().unwrap_or(0.0)
    }
}

impl Crdt for GCounter {
    type Value = f64;
    type State = CounterState;

    fn apply(&mut self, op: Operation) -> bool {
        if self.has_seen(&op) {
            return false;
        }
        match op.kind {
            OpKind::Increment => {
                let delta = amount(&op).max(0.0);
                *self.counts.entry(op.origin.clone()).or_insert(0.0) += delta;
            }
            _ => panic!("{}", CrdtError::UnsupportedOp("GCounter only supports 'increment'")),
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
        self.counts.values().sum()
    }

    fn operations_since(&self, since: f64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.ts > since).cloned().collect()
    }

    fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    fn state(&self) -> Self::State {
        CounterState {
            operations: self.operations.clone(),
        }
    }

    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self {
        let mut counter = Self::new(node_id);
        for op in state.operations {
            counter.apply(op);
        }
        counter
    }
}

/// Positive-negative counter: increments and decrements, value is the
/// difference of two internal grow-only counters.
pub struct PnCounter {
    node_id: String,
    positive: HashMap<String, f64>,
    negative: HashMap<String, f64>,
    operations: Vec<Operation>,
    version_vector: VersionVector,
}

impl PnCounter {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            positive: HashMap::new(),
            negative: HashMap::new(),
            operations: Vec::new(),
            version_vector: VersionVector::new(),
        }
    }

    fn has_seen(&self, op: &Operation) -> bool {
        self.operations.iter().any(|existing| existing.id == op.id)
    }

    pub fn increment(&mut self, amount: f64) -> Operation {
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Increment, Some(serde_json::json!(amount)));
        self.apply(op.clone());
        op
    }

    pub fn decrement(&mut self, amount: f64) -> Operation {
        let op = Operation::new(self.node_id.clone(), vec![], OpKind::Decrement, Some(serde_json::json!(amount)));
        self.apply(op.clone());
        op
    }
}

impl Crdt for PnCounter {
    type Value = f64;
    type State = CounterState;

    fn apply(&mut self, op: Operation) -> bool {
        if self.has_seen(&op) {
            return false;
        }
        match op.kind {
            OpKind::Increment => {
                let delta = amount(&op).max(0.0);
                *self.positive.entry(op.origin.clone()).or_insert(0.0) += delta;
            }
            OpKind::Decrement => {
                let delta = amount(&op).max(0.0);
                *self.negative.entry(op.origin.clone()).or_insert(0.0) += delta;
            }
            _ => panic!("{}", CrdtError::UnsupportedOp("PnCounter only supports 'increment'/'decrement'")),
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
        let pos: f64 = self.positive.values().sum();
        let neg: f64 = self.negative.values().sum();
        pos - neg
    }

    fn operations_since(&self, since: f64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.ts > since).cloned().collect()
    }

    fn all_operations(&self) -> &[Operation] {
        &self.operations
    }

    fn state(&self) -> Self::State {
        CounterState {
            operations: self.operations.clone(),
        }
    }

    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self {
        let mut counter = Self::new(node_id);
        for op in state.operations {
            counter.apply(op);
        }
        counter
    }
}
