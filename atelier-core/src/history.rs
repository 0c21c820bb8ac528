//! # Undo/Redo History
//!
//! One bounded stack pair per theme, shared by every collaborator in the
//! room: any member can undo the team's most recent structural change.
//! The acting subject is recorded for attribution only.
//!
//! - Each committed operation pushes a [`HistoryEntry`] holding the
//!   affected subtree before and after the edit
//! - Undo re-applies `previous_state` and moves the entry to the redo stack
//! - Redo re-applies `new_state` and moves it back
//! - A new committed operation clears the redo stack
//! - When the undo stack exceeds its depth the oldest entry is dropped

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::EditError;
use crate::ops::{AppliedOperation, BlockSnapshot, OperationKind};
use crate::state::ThemeEditingState;

/// Default number of undo levels kept per theme.
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// Reversible record of one structural edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub operation_kind: OperationKind,
    pub block_id: String,
    /// Subtree before the edit (`None` for add/duplicate).
    pub previous_state: Option<BlockSnapshot>,
    /// Subtree after the edit (`None` for remove).
    pub new_state: Option<BlockSnapshot>,
    pub acting_subject_id: String,
    pub timestamp: u64,
}

impl HistoryEntry {
    pub fn from_applied(applied: &AppliedOperation, acting_subject_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            operation_kind: applied.kind.recorded(),
            block_id: applied.block_id.clone(),
            previous_state: applied.previous.clone(),
            new_state: applied.next.clone(),
            acting_subject_id: acting_subject_id.into(),
            timestamp,
        }
    }

    /// Put the tree back to how it was before this entry's edit.
    fn revert(&self, state: &mut ThemeEditingState) -> Result<(), EditError> {
        match (&self.previous_state, &self.new_state) {
            (Some(previous), _) => state.restore_snapshot(previous),
            (None, Some(next)) => state.discard_snapshot(next),
            (None, None) => Err(EditError::invalid("history entry carries no state")),
        }
    }

    /// Re-apply this entry's edit.
    fn replay(&self, state: &mut ThemeEditingState) -> Result<(), EditError> {
        match (&self.new_state, &self.previous_state) {
            (Some(next), _) => state.restore_snapshot(next),
            (None, Some(previous)) => state.discard_snapshot(previous),
            (None, None) => Err(EditError::invalid("history entry carries no state")),
        }
    }
}

/// Bounded undo/redo stacks for one theme.
#[derive(Debug)]
pub struct HistoryManager {
    /// Applied entries, most recent at the back
    undo_stack: VecDeque<HistoryEntry>,
    /// Undone entries, most recent last
    redo_stack: Vec<HistoryEntry>,
    max_depth: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_HISTORY_DEPTH)
    }

    /// A depth of 0 is treated as 1.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Record a freshly committed edit. Clears the redo stack.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.undo_stack.push_back(entry);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    /// Revert the most recent entry against `state`.
    ///
    /// On failure the stacks and the tree are left untouched.
    pub fn undo(&mut self, state: &mut ThemeEditingState) -> Result<HistoryEntry, EditError> {
        let entry = self.undo_stack.pop_back().ok_or(EditError::EmptyHistory)?;
        let mut scratch = state.clone();
        if let Err(e) = entry.revert(&mut scratch) {
            self.undo_stack.push_back(entry);
            return Err(e);
        }
        *state = scratch;
        self.redo_stack.push(entry.clone());
        Ok(entry)
    }

    /// Re-apply the most recently undone entry against `state`.
    pub fn redo(&mut self, state: &mut ThemeEditingState) -> Result<HistoryEntry, EditError> {
        let entry = self.redo_stack.pop().ok_or(EditError::EmptyHistory)?;
        let mut scratch = state.clone();
        if let Err(e) = entry.replay(&mut scratch) {
            self.redo_stack.push(entry);
            return Err(e);
        }
        *state = scratch;
        self.undo_stack.push_back(entry.clone());
        Ok(entry)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockKind, Zone};
    use crate::ops::BlockOperation;
    use serde_json::json;

    fn page() -> ThemeEditingState {
        ThemeEditingState::with_blocks(
            "t1",
            vec![
                Block::new("hero-1", BlockKind::Hero, Zone::Content).with_order(0),
                Block::new("cols", BlockKind::Columns, Zone::Content).with_order(1),
                Block::new("left", BlockKind::Text, Zone::Content).with_parent("cols"),
                Block::new("foot", BlockKind::Text, Zone::Footer),
            ],
        )
    }

    fn commit(state: &mut ThemeEditingState, history: &mut HistoryManager, op: BlockOperation) -> AppliedOperation {
        let applied = state.apply_operation(&op).unwrap();
        history.record(HistoryEntry::from_applied(&applied, "alice", 1));
        applied
    }

    #[test]
    fn test_undo_add_then_redo() {
        let mut state = page();
        let mut history = HistoryManager::new();
        let applied = commit(
            &mut state,
            &mut history,
            BlockOperation::add(json!({"type": "pricing", "zone": "content", "props": {"plan": "pro"}})).at(1),
        );
        let after_add = state.clone();

        let entry = history.undo(&mut state).unwrap();
        assert_eq!(entry.operation_kind, OperationKind::Add);
        assert!(!state.contains(&applied.block_id));
        assert_eq!(state, page());

        history.redo(&mut state).unwrap();
        assert_eq!(state.subtree(&applied.block_id), after_add.subtree(&applied.block_id));
        assert_eq!(state.block("cols").unwrap().order, 2);
    }

    #[test]
    fn test_round_trip_each_kind() {
        let ops = vec![
            BlockOperation::remove("cols"),
            BlockOperation::move_to("foot", json!({"parentId": "cols"})).at(0),
            BlockOperation::update("hero-1", json!({"title": "Hi"})),
            BlockOperation::duplicate("hero-1"),
            BlockOperation::reorder("cols", 0),
        ];
        for op in ops {
            let mut state = page();
            let mut history = HistoryManager::new();
            commit(&mut state, &mut history, op.clone());
            let after = state.clone();

            history.undo(&mut state).unwrap();
            assert!(state.orders_are_dense(), "{op:?}");
            for block in &page().blocks {
                assert_eq!(state.block(&block.id), Some(block), "{op:?}");
            }
            assert_eq!(state.len(), page().len());

            history.redo(&mut state).unwrap();
            for block in &after.blocks {
                assert_eq!(state.block(&block.id), Some(block), "{op:?}");
            }
            assert_eq!(state.len(), after.len());
        }
    }

    #[test]
    fn test_empty_history() {
        let mut state = page();
        let mut history = HistoryManager::new();
        assert_eq!(history.undo(&mut state).unwrap_err(), EditError::EmptyHistory);
        assert_eq!(history.redo(&mut state).unwrap_err(), EditError::EmptyHistory);
        assert_eq!(state, page());
    }

    #[test]
    fn test_new_operation_clears_redo() {
        let mut state = page();
        let mut history = HistoryManager::new();
        commit(&mut state, &mut history, BlockOperation::update("hero-1", json!({"a": 1})));
        history.undo(&mut state).unwrap();
        assert!(history.can_redo());

        commit(&mut state, &mut history, BlockOperation::update("hero-1", json!({"b": 2})));
        assert!(!history.can_redo());
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn test_depth_is_bounded() {
        let mut state = page();
        let mut history = HistoryManager::with_max_depth(3);
        for i in 0..5 {
            commit(&mut state, &mut history, BlockOperation::update("hero-1", json!({"n": i})));
        }
        assert_eq!(history.undo_depth(), 3);
        for _ in 0..3 {
            history.undo(&mut state).unwrap();
        }
        assert!(!history.can_undo());
        assert_eq!(state.block("hero-1").unwrap().props["n"], 1);
    }

    #[test]
    fn test_failed_undo_keeps_entry() {
        let mut state = page();
        let mut history = HistoryManager::new();
        commit(&mut state, &mut history, BlockOperation::add(json!({"type": "text", "parentId": "cols"})));
        // Remove the parent behind history's back.
        state.remove_subtree("cols");
        let before = state.clone();

        let err = history.undo(&mut state).unwrap_err();
        assert!(matches!(err, EditError::NotFound(_)));
        assert_eq!(history.undo_depth(), 1);
        assert_eq!(state, before);
    }

    #[test]
    fn test_undo_remove_restores_children() {
        let mut state = page();
        let mut history = HistoryManager::new();
        commit(&mut state, &mut history, BlockOperation::remove("cols"));
        history.undo(&mut state).unwrap();
        assert_eq!(state.subtree_ids("cols"), ["cols", "left"]);
        assert_eq!(state.block("cols").unwrap().order, 1);
    }
}
