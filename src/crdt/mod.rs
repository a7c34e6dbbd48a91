//! The CRDT engine (spec §3, §4.1–4.3).
//!
//! Five concrete CRDT kinds share one capability set rather than a class
//! hierarchy (Design Note 9): `apply`, `merge`, `value`, `state`/`from_state`,
//! `operations_since`. [`Crdt`] captures that set as a trait. A room's
//! document state is always a concrete [`map::LwwMap`] (`room.rs`), so
//! there's no call site that dispatches on CRDT kind dynamically — the
//! other four kinds are exercised directly by their own unit tests.

pub mod counter;
pub mod map;
pub mod op;
pub mod register;
pub mod set;

pub use op::{now_seconds, Operation, OpKind, Path, VersionVector};

/// Common capability set implemented by every CRDT in this crate.
pub trait Crdt {
    /// The resolved, read-only value type.
    type Value;
    /// The wire-transmissible full state.
    type State;

    /// Apply an operation. Returns `false` if it was already applied
    /// (operations are idempotent by id).
    fn apply(&mut self, op: Operation) -> bool;

    /// Merge another replica of the same CRDT into this one.
    fn merge(&mut self, other: &Self);

    /// The current resolved value.
    fn value(&self) -> Self::Value;

    /// Operations with `ts` strictly greater than `since`, in origin time.
    fn operations_since(&self, since: f64) -> Vec<Operation>;

    /// All operations this replica has recorded.
    fn all_operations(&self) -> &[Operation];

    /// Serialize full state for state-based transmission.
    fn state(&self) -> Self::State;

    /// Reconstruct a replica from transmitted state.
    fn from_state(node_id: impl Into<String>, state: Self::State) -> Self;
}
