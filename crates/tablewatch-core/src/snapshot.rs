//! In-memory snapshot of the watched table.
//!
//! The store is the single writer of table state. Every real transition bumps
//! the snapshot version, which the registry uses to line new subscribers up
//! with notifications already in flight.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::StateError;
use crate::event::{Change, ChangeKind, Notification};
use crate::value::Row;

#[derive(Debug)]
struct Slot {
    position: u64,
    row: Row,
}

#[derive(Debug, Default)]
struct SnapshotState {
    rows: HashMap<String, Slot>,
    /// Insertion position -> key.
    order: BTreeMap<u64, String>,
    next_position: u64,
    version: u64,
}

impl SnapshotState {
    fn ordered_rows(&self) -> Result<Vec<Row>, StateError> {
        let mut out = Vec::with_capacity(self.rows.len());
        for (position, key) in &self.order {
            let slot = self
                .rows
                .get(key)
                .ok_or_else(|| StateError::OrderIndexCorrupted(key.clone()))?;
            if slot.position != *position {
                return Err(StateError::DuplicateKey(key.clone()));
            }
            out.push(slot.row.clone());
        }
        Ok(out)
    }
}

/// Outcome of reconciling one change against the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// The change did not alter the snapshot.
    Unchanged,
    /// The snapshot transitioned; the notification describes how.
    Changed(Notification),
}

impl Reconciled {
    /// Returns true if the snapshot changed.
    pub fn changed(&self) -> bool {
        matches!(self, Reconciled::Changed(_))
    }
}

/// Current rows of the watched table, keyed by natural key, in insertion order.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    state: RwLock<SnapshotState>,
}

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile a validated change.
    ///
    /// Inserts on an existing key merge as updates, updates on a missing key
    /// heal as inserts, deletes of a missing key and images equal to the
    /// stored row are no-ops.
    pub fn apply(&self, change: Change) -> Result<Reconciled, StateError> {
        let mut state = self.state.write();

        match change {
            Change::Upsert { row, .. } => {
                let key = row.key().to_string();
                if let Some(slot) = state.rows.get_mut(&key) {
                    if slot.row == row {
                        return Ok(Reconciled::Unchanged);
                    }
                    let old = std::mem::replace(&mut slot.row, row.clone());
                    state.version += 1;
                    return Ok(Reconciled::Changed(Notification {
                        key,
                        kind: ChangeKind::Updated,
                        new_row: Some(row),
                        old_row: Some(old),
                        version: state.version,
                    }));
                }

                let position = state.next_position;
                if let Some(existing) = state.order.insert(position, key.clone()) {
                    return Err(StateError::DuplicateKey(existing));
                }
                state.next_position += 1;
                state.rows.insert(
                    key.clone(),
                    Slot {
                        position,
                        row: row.clone(),
                    },
                );
                state.version += 1;
                Ok(Reconciled::Changed(Notification {
                    key,
                    kind: ChangeKind::Inserted,
                    new_row: Some(row),
                    old_row: None,
                    version: state.version,
                }))
            }
            Change::Delete { key } => {
                let Some(slot) = state.rows.remove(&key) else {
                    return Ok(Reconciled::Unchanged);
                };
                if state.order.remove(&slot.position).as_deref() != Some(key.as_str()) {
                    return Err(StateError::OrderIndexCorrupted(key));
                }
                state.version += 1;
                Ok(Reconciled::Changed(Notification {
                    key,
                    kind: ChangeKind::Deleted,
                    new_row: None,
                    old_row: Some(slot.row),
                    version: state.version,
                }))
            }
        }
    }

    /// Copy of all rows in insertion order.
    pub fn snapshot(&self) -> Result<Vec<Row>, StateError> {
        self.state.read().ordered_rows()
    }

    /// Run `f` against a consistent view: the version and the rows it covers.
    ///
    /// No change can be applied while `f` runs.
    pub fn read_with<R>(&self, f: impl FnOnce(u64, Vec<Row>) -> R) -> Result<R, StateError> {
        let state = self.state.read();
        let rows = state.ordered_rows()?;
        Ok(f(state.version, rows))
    }

    /// Copy of a single row.
    pub fn get(&self, key: &str) -> Option<Row> {
        self.state.read().rows.get(key).map(|slot| slot.row.clone())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Returns true if the snapshot holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }
}
