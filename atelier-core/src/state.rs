//! In-memory projection of one theme while it is being edited.
//!
//! Blocks are stored flat; the tree shape comes from `parent_id` links and
//! sibling order from `order`. Every mutation goes through the helpers here,
//! which keep each `(parent, zone)` group numbered `0..n` with no ties.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};

use crate::block::{Block, GroupKey};

/// Authoritative block tree and settings of a theme under edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeEditingState {
    pub theme_id: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default = "empty_settings")]
    pub settings: Value,
}

fn empty_settings() -> Value {
    Value::Object(Map::new())
}

impl ThemeEditingState {
    pub fn new(theme_id: impl Into<String>) -> Self {
        Self {
            theme_id: theme_id.into(),
            blocks: Vec::new(),
            settings: empty_settings(),
        }
    }

    /// Build a state from persisted blocks, normalising sibling order.
    pub fn with_blocks(theme_id: impl Into<String>, blocks: Vec<Block>) -> Self {
        let mut state = Self {
            theme_id: theme_id.into(),
            blocks,
            settings: empty_settings(),
        };
        state.normalize();
        state
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub(crate) fn block_mut(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.block(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks of one sibling group, sorted by `order`.
    pub fn group(&self, key: &GroupKey) -> Vec<&Block> {
        let mut members: Vec<&Block> = self
            .blocks
            .iter()
            .filter(|b| b.parent_id == key.parent_id && b.zone == key.zone)
            .collect();
        members.sort_by_key(|b| b.order);
        members
    }

    /// Ids of a sibling group in order.
    pub fn group_ids(&self, key: &GroupKey) -> Vec<String> {
        self.group(key).into_iter().map(|b| b.id.clone()).collect()
    }

    /// Every distinct sibling group currently present.
    pub fn groups(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = Vec::new();
        for block in &self.blocks {
            let key = block.group();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Ids of `root` and all of its descendants, root first (breadth-first).
    pub fn subtree_ids(&self, root: &str) -> Vec<String> {
        if !self.contains(root) {
            return Vec::new();
        }
        let mut ids = vec![root.to_string()];
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(current) = queue.pop_front() {
            let mut children: Vec<&Block> = self
                .blocks
                .iter()
                .filter(|b| b.parent_id.as_deref() == Some(current.as_str()))
                .collect();
            children.sort_by_key(|b| b.order);
            for child in children {
                ids.push(child.id.clone());
                queue.push_back(child.id.clone());
            }
        }
        ids
    }

    /// Cloned blocks of a subtree, root first.
    pub fn subtree(&self, root: &str) -> Vec<Block> {
        self.subtree_ids(root)
            .iter()
            .filter_map(|id| self.block(id).cloned())
            .collect()
    }

    /// True when `candidate` is `ancestor` itself or lies beneath it.
    pub fn is_within(&self, ancestor: &str, candidate: &str) -> bool {
        let mut current = Some(candidate.to_string());
        let mut seen = HashSet::new();
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                return false;
            }
            current = self.block(&id).and_then(|b| b.parent_id.clone());
        }
        false
    }

    /// Renumber a sibling group to `0..n`, keeping relative order.
    pub(crate) fn renumber(&mut self, key: &GroupKey) {
        let ids = self.group_ids(key);
        self.apply_group_order(&ids);
    }

    fn apply_group_order(&mut self, ordered_ids: &[String]) {
        for (index, id) in ordered_ids.iter().enumerate() {
            if let Some(block) = self.block_mut(id) {
                block.order = index;
            }
        }
    }

    /// Insert `block` into its group at `position` (clamped to the end) and
    /// renumber the group. Returns the index actually used.
    pub(crate) fn insert_at(&mut self, block: Block, position: Option<usize>) -> usize {
        let key = block.group();
        let mut ids = self.group_ids(&key);
        let index = position.unwrap_or(ids.len()).min(ids.len());
        ids.insert(index, block.id.clone());
        self.blocks.push(block);
        self.apply_group_order(&ids);
        index
    }

    /// Remove `root` and its descendants; renumber the group it left.
    pub(crate) fn remove_subtree(&mut self, root: &str) -> Vec<Block> {
        let Some(key) = self.block(root).map(Block::group) else {
            return Vec::new();
        };
        let ids: HashSet<String> = self.subtree_ids(root).into_iter().collect();
        let mut removed = Vec::new();
        self.blocks.retain(|b| {
            if ids.contains(&b.id) {
                removed.push(b.clone());
                false
            } else {
                true
            }
        });
        self.renumber(&key);
        removed
    }

    /// Renumber every group; used when loading persisted blocks.
    pub fn normalize(&mut self) {
        for key in self.groups() {
            self.renumber(&key);
        }
    }

    /// Whether every sibling group is numbered `0..n` with no ties.
    pub fn orders_are_dense(&self) -> bool {
        self.groups().iter().all(|key| {
            self.group(key)
                .iter()
                .enumerate()
                .all(|(index, block)| block.order == index)
        })
    }
}
