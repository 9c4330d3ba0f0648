// ↩️ History Manager - Linear undo/redo over whole change-sets
//
// A change-set is the unit of reversibility: one drop that promoted three
// siblings is undone as one step, never partially.
//
// Classic linear stack, not a tree:
//   record → truncate redo tail, append, advance cursor
//   undo   → return entry at cursor, step back
//   redo   → step forward, return entry at cursor
//
// The manager only stores and hands back change-sets. Applying them (or their
// inverse) to the state tree is the caller's job.

use crate::entities::{ChangeKind, Mapping, PendingChange};
use crate::store::Action;
use serde::{Deserialize, Serialize};

// ============================================================================
// MAPPING CHANGE
// ============================================================================

/// One atomic mapping mutation, carrying everything needed to invert it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingChange {
    /// `index`: position to insert at; None appends
    Create {
        after: Mapping,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    /// `before` is the pre-image captured before the mutation was applied
    Update { before: Mapping, after: Mapping },
    /// `index`: position the mapping held in the list, restored on undo
    Delete {
        before: Mapping,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
}

impl MappingChange {
    pub fn mapping_id(&self) -> &str {
        match self {
            MappingChange::Create { after, .. } | MappingChange::Update { after, .. } => {
                &after.mapping_id
            }
            MappingChange::Delete { before, .. } => &before.mapping_id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            MappingChange::Create { .. } => ChangeKind::Create,
            MappingChange::Update { .. } => ChangeKind::Update,
            MappingChange::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// CREATE ↔ DELETE, UPDATE swaps pre- and post-image
    pub fn inverse(&self) -> MappingChange {
        match self {
            MappingChange::Create { after, index } => MappingChange::Delete {
                before: after.clone(),
                index: *index,
            },
            MappingChange::Update { before, after } => MappingChange::Update {
                before: after.clone(),
                after: before.clone(),
            },
            MappingChange::Delete { before, index } => MappingChange::Create {
                after: before.clone(),
                index: *index,
            },
        }
    }

    /// Store transition that applies this change forward
    pub fn to_action(&self) -> Action {
        match self {
            MappingChange::Create {
                after,
                index: Some(index),
            } => Action::InsertMapping {
                index: *index,
                mapping: after.clone(),
            },
            MappingChange::Create { after, index: None } | MappingChange::Update { after, .. } => {
                Action::UpsertMapping(after.clone())
            }
            MappingChange::Delete { before, .. } => Action::RemoveMapping(before.mapping_id.clone()),
        }
    }

    /// Pending-queue entry mirroring this change
    pub fn to_pending(&self) -> PendingChange {
        match self {
            MappingChange::Create { after, .. } => {
                PendingChange::new(ChangeKind::Create, after.clone())
            }
            MappingChange::Update { after, .. } => {
                PendingChange::new(ChangeKind::Update, after.clone())
            }
            MappingChange::Delete { before, .. } => {
                PendingChange::new(ChangeKind::Delete, before.clone())
            }
        }
    }
}

// ============================================================================
// CHANGE SET
// ============================================================================

/// Pending queue on either side of a recorded change-set. Only valid while
/// `epoch` matches the recorder's save counter: a save rewrites the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJournal {
    pub epoch: u64,
    pub before: Vec<PendingChange>,
    pub after: Vec<PendingChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Short description for status lines ("connect 1001 → A-100")
    pub label: String,
    pub changes: Vec<MappingChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<PendingJournal>,
}

impl ChangeSet {
    pub fn new(label: &str, changes: Vec<MappingChange>) -> Self {
        ChangeSet {
            label: label.to_string(),
            changes,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: PendingJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn single(label: &str, change: MappingChange) -> Self {
        ChangeSet::new(label, vec![change])
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Inverse change-set: each change inverted, in reverse order
    pub fn inverse(&self) -> ChangeSet {
        ChangeSet {
            label: format!("undo {}", self.label),
            changes: self.changes.iter().rev().map(MappingChange::inverse).collect(),
            journal: self.journal.as_ref().map(|j| PendingJournal {
                epoch: j.epoch,
                before: j.after.clone(),
                after: j.before.clone(),
            }),
        }
    }

    /// One batched transition applying every change forward
    pub fn to_action(&self) -> Action {
        Action::Batch(self.changes.iter().map(MappingChange::to_action).collect())
    }

    pub fn to_pending(&self) -> Vec<PendingChange> {
        self.changes.iter().map(MappingChange::to_pending).collect()
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

#[derive(Debug, Clone)]
pub struct HistoryManager {
    entries: Vec<ChangeSet>,
    /// Index of the last applied entry; -1 = nothing applied
    cursor: isize,
    /// Optional cap; oldest entries are dropped first
    capacity: Option<usize>,
}

impl HistoryManager {
    pub fn new() -> Self {
        HistoryManager {
            entries: Vec::new(),
            cursor: -1,
            capacity: None,
        }
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        HistoryManager {
            capacity: Some(capacity.max(1)),
            ..HistoryManager::new()
        }
    }

    /// Record one mutation as its own change-set
    pub fn record_change(&mut self, label: &str, change: MappingChange) {
        self.record_changes(ChangeSet::single(label, change));
    }

    /// Record a batch; empty change-sets are ignored
    pub fn record_changes(&mut self, change_set: ChangeSet) {
        if change_set.is_empty() {
            return;
        }

        // Drop the redo tail beyond the cursor
        let keep = (self.cursor + 1) as usize;
        self.entries.truncate(keep);

        self.entries.push(change_set);
        self.cursor = self.entries.len() as isize - 1;

        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                self.entries.remove(0);
                self.cursor -= 1;
            }
        }
    }

    /// Change-set to invert, or `None` when there is nothing to undo
    pub fn undo(&mut self) -> Option<ChangeSet> {
        if self.cursor < 0 {
            return None;
        }
        let entry = self.entries[self.cursor as usize].clone();
        self.cursor -= 1;
        Some(entry)
    }

    /// Change-set to re-apply forward, or `None` at the head
    pub fn redo(&mut self) -> Option<ChangeSet> {
        let next = self.cursor + 1;
        if next as usize >= self.entries.len() {
            return None;
        }
        self.cursor = next;
        Some(self.entries[next as usize].clone())
    }

    /// Put an entry handed out by `undo` back on the stack, as if it was never undone
    pub fn restore_undo(&mut self) {
        if ((self.cursor + 1) as usize) < self.entries.len() {
            self.cursor += 1;
        }
    }

    /// Put an entry handed out by `redo` back, as if it was never redone
    pub fn restore_redo(&mut self) {
        if self.cursor >= 0 {
            self.cursor -= 1;
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor >= 0
    }

    pub fn can_redo(&self) -> bool {
        ((self.cursor + 1) as usize) < self.entries.len()
    }

    pub fn peek_undo(&self) -> Option<&ChangeSet> {
        if self.cursor < 0 {
            None
        } else {
            self.entries.get(self.cursor as usize)
        }
    }

    pub fn peek_redo(&self) -> Option<&ChangeSet> {
        self.entries.get((self.cursor + 1) as usize)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = -1;
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{MappingShape, MappingStatus};
    use crate::store::{reduce, WorkspaceState};

    fn mapping(id: &str) -> Mapping {
        Mapping::new(id, "1001", "A-100", "tester")
    }

    fn create(id: &str) -> ChangeSet {
        ChangeSet::single("create", MappingChange::Create { after: mapping(id), index: None })
    }

    #[test]
    fn test_empty_history() {
        let mut history = HistoryManager::new();
        assert_eq!(history.cursor(), -1);
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
        assert_eq!(history.cursor(), -1);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_returns_entry_and_moves_cursor() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        history.record_changes(create("MAP-2"));
        assert_eq!(history.cursor(), 1);

        let undone = history.undo().unwrap();
        assert_eq!(undone.changes[0].mapping_id(), "MAP-2");
        assert_eq!(history.cursor(), 0);
        assert!(history.can_redo());
    }

    #[test]
    fn test_redo_at_head_is_noop() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        assert!(history.redo().is_none());
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_redo_returns_undone_entry() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        let undone = history.undo().unwrap();
        let redone = history.redo().unwrap();
        assert_eq!(undone, redone);
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_record_after_undo_discards_redo_tail() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        history.record_changes(create("MAP-2"));
        history.record_changes(create("MAP-3"));
        history.undo();
        history.undo();

        history.record_changes(create("MAP-4"));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
        assert_eq!(history.peek_undo().unwrap().changes[0].mapping_id(), "MAP-4");
    }

    #[test]
    fn test_empty_change_set_not_recorded() {
        let mut history = HistoryManager::new();
        history.record_changes(ChangeSet::new("noop", vec![]));
        assert!(history.is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut history = HistoryManager::with_capacity_limit(2);
        history.record_changes(create("MAP-1"));
        history.record_changes(create("MAP-2"));
        history.record_changes(create("MAP-3"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), 1);
        assert_eq!(history.undo().unwrap().changes[0].mapping_id(), "MAP-3");
        assert_eq!(history.undo().unwrap().changes[0].mapping_id(), "MAP-2");
        assert!(history.undo().is_none());
    }

    #[test]
    fn test_clear_resets() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        history.clear();
        assert_eq!(history.cursor(), -1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_restore_undo_and_redo() {
        let mut history = HistoryManager::new();
        history.record_changes(create("MAP-1"));
        history.undo();
        history.restore_undo();
        assert_eq!(history.cursor(), 0);
        history.undo();
        history.redo();
        history.restore_redo();
        assert_eq!(history.cursor(), -1);
    }

    #[test]
    fn test_inverse_kinds() {
        let m = mapping("MAP-1");
        let mut promoted = m.clone();
        promoted.shape = MappingShape::OneToMany { group_id: "G".to_string() };

        assert_eq!(
            MappingChange::Create { after: m.clone(), index: None }.inverse().kind(),
            ChangeKind::Delete
        );
        assert_eq!(
            MappingChange::Delete { before: m.clone(), index: Some(0) }.inverse().kind(),
            ChangeKind::Create
        );
        let update = MappingChange::Update { before: m.clone(), after: promoted.clone() };
        assert_eq!(
            update.inverse(),
            MappingChange::Update { before: promoted, after: m }
        );
    }

    #[test]
    fn test_record_then_undo_restores_state() {
        let original = mapping("MAP-1");
        let base = reduce(
            WorkspaceState::default(),
            Action::UpsertMapping(original.clone()),
        );

        // Promote the existing mapping and add a sibling, as one change-set
        let mut promoted = original.clone();
        promoted.shape = MappingShape::OneToMany { group_id: "G".to_string() };
        promoted.split_weight = 0.5;
        let mut sibling = Mapping::new("MAP-2", "1001", "A-200", "tester");
        sibling.shape = promoted.shape.clone();
        sibling.split_weight = 0.5;

        let change_set = ChangeSet::new(
            "connect",
            vec![
                MappingChange::Update { before: original, after: promoted },
                MappingChange::Create { after: sibling, index: None },
            ],
        );

        let mut history = HistoryManager::new();
        let applied = reduce(base.clone(), change_set.to_action());
        history.record_changes(change_set);
        assert_eq!(applied.mappings.len(), 2);

        let undone = history.undo().unwrap();
        let restored = reduce(applied, undone.inverse().to_action());
        assert_eq!(restored, base);
    }

    #[test]
    fn test_delete_then_undo_restores_state() {
        let mut m = mapping("MAP-1");
        m.status = MappingStatus::Active;
        let base = reduce(WorkspaceState::default(), Action::UpsertMapping(m.clone()));

        let change_set = ChangeSet::single(
            "delete",
            MappingChange::Delete { before: m, index: Some(0) },
        );
        let applied = reduce(base.clone(), change_set.to_action());
        assert!(applied.mappings.is_empty());

        let restored = reduce(applied, change_set.inverse().to_action());
        assert_eq!(restored, base);
    }

    #[test]
    fn test_undo_delete_restores_position() {
        let base = reduce(
            WorkspaceState::default(),
            Action::Batch(vec![
                Action::UpsertMapping(Mapping::new("MAP-1", "1001", "A-100", "tester")),
                Action::UpsertMapping(Mapping::new("MAP-2", "1002", "A-200", "tester")),
                Action::UpsertMapping(Mapping::new("MAP-3", "1003", "A-300", "tester")),
            ]),
        );
        let middle = base.mappings[1].clone();

        let change_set = ChangeSet::single(
            "delete",
            MappingChange::Delete { before: middle, index: Some(1) },
        );
        let applied = reduce(base.clone(), change_set.to_action());
        let ids: Vec<&str> = applied.mappings.iter().map(|m| m.mapping_id.as_str()).collect();
        assert_eq!(ids, vec!["MAP-1", "MAP-3"]);

        let restored = reduce(applied.clone(), change_set.inverse().to_action());
        assert_eq!(restored, base);

        // Redo removes it again
        let redone = reduce(restored, change_set.inverse().inverse().to_action());
        assert_eq!(redone, applied);
    }

    #[test]
    fn test_inverse_swaps_journal() {
        let journal = PendingJournal {
            epoch: 3,
            before: vec![],
            after: vec![PendingChange::new(ChangeKind::Create, mapping("MAP-1"))],
        };
        let change_set = create("MAP-1").with_journal(journal.clone());
        let inverse = change_set.inverse().journal.unwrap();
        assert_eq!(inverse.epoch, 3);
        assert_eq!(inverse.before, journal.after);
        assert!(inverse.after.is_empty());
    }

    #[test]
    fn test_to_pending_mirrors_changes() {
        let m = mapping("MAP-1");
        let change_set = ChangeSet::new(
            "mixed",
            vec![
                MappingChange::Create { after: m.clone(), index: None },
                MappingChange::Delete { before: m, index: None },
            ],
        );
        let kinds: Vec<ChangeKind> = change_set.to_pending().iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Create, ChangeKind::Delete]);
    }
}
