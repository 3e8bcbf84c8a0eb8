//! Append-only operation log with a monotonic version counter.

use crate::ot::model::Operation;

/// A deep-copied point-in-time view of the history.
#[derive(Clone, Debug)]
pub struct HistorySnapshot {
    pub operations: Vec<Operation>,
    pub version: u64,
    pub timestamp: u64,
}

/// Append-only vector of [`Operation`] plus a version counter.
///
/// Callers must validate `op.version == version` before calling [`append`];
/// this structure does not re-check (see the design spec's §4.2).
#[derive(Default)]
pub struct OperationHistory {
    operations: Vec<Operation>,
    version: u64,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Append `op`, advancing `version` to `max(version, op.version + 1)`.
    pub fn append(&mut self, op: Operation) {
        self.version = self.version.max(op.version + 1);
        self.operations.push(op);
    }

    pub fn since_version(&self, v: u64) -> Vec<Operation> {
        self.operations.iter().filter(|op| op.version >= v).cloned().collect()
    }

    pub fn between(&self, a: u64, b: u64) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.version >= a && op.version < b)
            .cloned()
            .collect()
    }

    pub fn by_client(&self, client_id: &str) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| op.client_id == client_id)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self, now: u64) -> HistorySnapshot {
        HistorySnapshot {
            operations: self.operations.clone(),
            version: self.version,
            timestamp: now,
        }
    }

    /// Recovery after server-authoritative reordering: retain ops with
    /// `version < from_version`, append `new_ops`, then set `version` to
    /// `to_version`.
    pub fn rebase(&mut self, from_version: u64, to_version: u64, new_ops: Vec<Operation>) {
        self.operations.retain(|op| op.version < from_version);
        self.operations.extend(new_ops);
        self.version = to_version;
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.version = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::model::Operation;

    fn op(version: u64) -> Operation {
        Operation::insert(format!("o{version}"), 0, "a".into(), "c1".into(), version)
    }

    #[test]
    fn append_advances_version() {
        let mut h = OperationHistory::new();
        assert_eq!(h.version(), 0);
        h.append(op(0));
        assert_eq!(h.version(), 1);
        h.append(op(1));
        assert_eq!(h.version(), 2);
    }

    #[test]
    fn since_version_filters() {
        let mut h = OperationHistory::new();
        h.append(op(0));
        h.append(op(1));
        h.append(op(2));
        assert_eq!(h.since_version(1).len(), 2);
    }

    #[test]
    fn rebase_retains_and_replaces() {
        let mut h = OperationHistory::new();
        h.append(op(0));
        h.append(op(1));
        h.append(op(2));
        h.rebase(2, 5, vec![op(5)]);
        assert_eq!(h.len(), 3);
        assert_eq!(h.version(), 5);
    }

    #[test]
    fn clear_resets() {
        let mut h = OperationHistory::new();
        h.append(op(0));
        h.clear();
        assert_eq!(h.version(), 0);
        assert!(h.is_empty());
    }
}
