//! Linear undo/redo history of full-text snapshots.
//!
//! Appending after an undo throws away the redo branch; there is no tree.

/// Snapshot log with a cursor.
///
/// Invariant: `snapshots` is never empty and `index < snapshots.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditHistory {
    snapshots: Vec<String>,
    index: usize,
}

impl EditHistory {
    /// Create a history holding a single snapshot.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            snapshots: vec![initial.into()],
            index: 0,
        }
    }

    /// Rebuild a history from persisted parts, repairing anything that would
    /// break the invariant. An empty list becomes `[fallback]`, an index past
    /// the end is clamped to the last snapshot.
    pub fn from_parts(snapshots: Vec<String>, index: usize, fallback: &str) -> Self {
        if snapshots.is_empty() {
            return Self::new(fallback);
        }
        let index = index.min(snapshots.len() - 1);
        Self { snapshots, index }
    }

    /// Record a new state after the current one, dropping any redo branch.
    pub fn append(&mut self, state: impl Into<String>) {
        self.snapshots.truncate(self.index + 1);
        self.snapshots.push(state.into());
        self.index = self.snapshots.len() - 1;
    }

    /// Step back one snapshot. Returns the new current state, or `None` when
    /// already at the oldest snapshot.
    pub fn undo(&mut self) -> Option<&str> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        Some(self.current())
    }

    /// Step forward one snapshot. Returns the new current state, or `None`
    /// when already at the newest snapshot.
    pub fn redo(&mut self) -> Option<&str> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }

    /// Drop everything and start over from `initial`.
    pub fn reset(&mut self, initial: impl Into<String>) {
        self.snapshots.clear();
        self.snapshots.push(initial.into());
        self.index = 0;
    }

    pub fn current(&self) -> &str {
        &self.snapshots[self.index]
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.snapshots.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Always `false`: a history holds at least one snapshot.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[String] {
        &self.snapshots
    }
}
