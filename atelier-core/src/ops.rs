//! Block operation processor.
//!
//! Validates and applies structural edits against a [`ThemeEditingState`].
//! Validation happens before the first mutation, so a rejected operation
//! leaves the tree exactly as it was.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::block::{Block, BlockKind, GroupKey, Zone};
use crate::error::EditError;
use crate::state::ThemeEditingState;

/// Structural operation requested by an editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Remove,
    Move,
    Update,
    Duplicate,
    /// Move within the current sibling group; recorded as `Move`.
    Reorder,
}

impl OperationKind {
    /// Kind stored in history for an operation of this kind.
    pub fn recorded(self) -> Self {
        match self {
            OperationKind::Reorder => OperationKind::Move,
            other => other,
        }
    }
}

/// `blockUpdate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl BlockOperation {
    pub fn new(operation: OperationKind, block_id: Option<&str>) -> Self {
        Self {
            block_id: block_id.map(str::to_string),
            operation,
            data: None,
            position: None,
        }
    }

    pub fn add(data: Value) -> Self {
        Self::new(OperationKind::Add, None).with_data(data)
    }

    pub fn remove(block_id: &str) -> Self {
        Self::new(OperationKind::Remove, Some(block_id))
    }

    pub fn update(block_id: &str, data: Value) -> Self {
        Self::new(OperationKind::Update, Some(block_id)).with_data(data)
    }

    pub fn move_to(block_id: &str, data: Value) -> Self {
        Self::new(OperationKind::Move, Some(block_id)).with_data(data)
    }

    pub fn duplicate(block_id: &str) -> Self {
        Self::new(OperationKind::Duplicate, Some(block_id))
    }

    pub fn reorder(block_id: &str, position: usize) -> Self {
        Self::new(OperationKind::Reorder, Some(block_id)).at(position)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Captured state of a block and its descendants, root first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub blocks: Vec<Block>,
}

impl BlockSnapshot {
    pub fn capture(state: &ThemeEditingState, root: &str) -> Option<Self> {
        let blocks = state.subtree(root);
        if blocks.is_empty() {
            None
        } else {
            Some(Self { blocks })
        }
    }

    pub fn root(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.id.as_str())
    }
}

/// Outcome of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedOperation {
    /// Kind as recorded in history (`Reorder` becomes `Move`).
    pub kind: OperationKind,
    pub block_id: String,
    /// Subtree before the edit; `None` for add/duplicate.
    pub previous: Option<BlockSnapshot>,
    /// Subtree after the edit; `None` for remove.
    pub next: Option<BlockSnapshot>,
}

impl AppliedOperation {
    /// Blocks as they now stand, root first.
    pub fn affected_blocks(&self) -> Vec<Block> {
        self.next.as_ref().map(|s| s.blocks.clone()).unwrap_or_default()
    }

    /// Ids no longer present after the edit.
    pub fn removed_ids(&self) -> Vec<String> {
        match (&self.previous, &self.next) {
            (Some(prev), None) => prev.ids().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// Where a moved block should land.
struct Target {
    parent_id: Option<String>,
    zone: Zone,
}

impl ThemeEditingState {
    /// Validate and apply one structural operation.
    pub fn apply_operation(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let applied = match op.operation {
            OperationKind::Add => self.add_block(op)?,
            OperationKind::Remove => self.remove_block(op)?,
            OperationKind::Move => self.move_block(op)?,
            OperationKind::Reorder => self.reorder_block(op)?,
            OperationKind::Update => self.update_block(op)?,
            OperationKind::Duplicate => self.duplicate_block(op)?,
        };
        log::debug!(
            "theme {}: applied {:?} to {}",
            self.theme_id,
            op.operation,
            applied.block_id
        );
        Ok(applied)
    }

    fn add_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let data = data_object(op)?;
        let kind: BlockKind = match data.get("type") {
            Some(Value::String(tag)) => tag.parse()?,
            _ => return Err(EditError::invalid("add requires a string 'type'")),
        };
        let props = match data.get("props") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(props)) => props.clone(),
            Some(_) => return Err(EditError::invalid("'props' must be an object")),
        };
        let parent_id = optional_string(data, "parentId")?;
        let zone = match &parent_id {
            Some(parent) => {
                self.block(parent)
                    .ok_or_else(|| EditError::NotFound(parent.clone()))?
                    .zone
            }
            None => match optional_string(data, "zone")? {
                Some(zone) => zone.parse()?,
                None => return Err(EditError::invalid("add requires 'zone' or 'parentId'")),
            },
        };

        let id = match optional_string(data, "id")? {
            Some(proposed) if !self.contains(&proposed) => proposed,
            _ => self.fresh_id(kind),
        };

        let mut block = Block::new(id.clone(), kind, zone);
        block.props = props;
        block.parent_id = parent_id;
        self.insert_at(block, op.position);

        Ok(AppliedOperation {
            kind: OperationKind::Add,
            block_id: id.clone(),
            previous: None,
            next: BlockSnapshot::capture(self, &id),
        })
    }

    fn remove_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let id = self.existing_id(op)?;
        let previous = BlockSnapshot::capture(self, &id);
        self.remove_subtree(&id);
        Ok(AppliedOperation {
            kind: OperationKind::Remove,
            block_id: id,
            previous,
            next: None,
        })
    }

    fn move_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let id = self.existing_id(op)?;
        let target = self.resolve_target(&id, op.data.as_ref())?;
        self.relocate(id, target, op.position, OperationKind::Move)
    }

    fn reorder_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let id = self.existing_id(op)?;
        let position = op
            .position
            .ok_or_else(|| EditError::invalid("reorder requires a position"))?;
        let current = self.block(&id).map(Block::group).ok_or_else(|| EditError::NotFound(id.clone()))?;
        let target = Target {
            parent_id: current.parent_id,
            zone: current.zone,
        };
        self.relocate(id, target, Some(position), OperationKind::Move)
    }

    fn relocate(
        &mut self,
        id: String,
        target: Target,
        position: Option<usize>,
        kind: OperationKind,
    ) -> Result<AppliedOperation, EditError> {
        let previous = BlockSnapshot::capture(self, &id);
        let mut moved = self.remove_subtree(&id);
        if moved.is_empty() {
            return Err(EditError::NotFound(id));
        }
        let mut root = moved.remove(0);
        root.parent_id = target.parent_id;
        root.zone = target.zone;
        for descendant in &mut moved {
            descendant.zone = target.zone;
        }
        self.insert_at(root, position);
        self.blocks.extend(moved);

        Ok(AppliedOperation {
            kind,
            block_id: id.clone(),
            previous,
            next: BlockSnapshot::capture(self, &id),
        })
    }

    fn resolve_target(&self, id: &str, data: Option<&Value>) -> Result<Target, EditError> {
        let current = self.block(id).ok_or_else(|| EditError::NotFound(id.to_string()))?;
        let data = match data {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => return Err(EditError::invalid("move data must be an object")),
        };

        let parent_id = match data.and_then(|d| d.get("parentId")) {
            None => current.parent_id.clone(),
            Some(Value::Null) => None,
            Some(Value::String(parent)) => Some(parent.clone()),
            Some(_) => return Err(EditError::invalid("'parentId' must be a string or null")),
        };

        match parent_id {
            Some(parent) => {
                let parent_block = self
                    .block(&parent)
                    .ok_or_else(|| EditError::NotFound(parent.clone()))?;
                if self.is_within(id, &parent) {
                    return Err(EditError::invalid(format!(
                        "cannot move {id} into its own descendant {parent}"
                    )));
                }
                Ok(Target {
                    zone: parent_block.zone,
                    parent_id: Some(parent),
                })
            }
            None => {
                let zone = match data.map(|d| optional_string(d, "zone")).transpose()?.flatten() {
                    Some(zone) => zone.parse()?,
                    None => current.zone,
                };
                Ok(Target {
                    parent_id: None,
                    zone,
                })
            }
        }
    }

    fn update_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let id = self.existing_id(op)?;
        let data = data_object(op)?.clone();
        let previous = BlockSnapshot::capture(self, &id);
        let block = self.block_mut(&id).ok_or_else(|| EditError::NotFound(id.clone()))?;
        for (key, value) in data {
            block.props.insert(key, value);
        }
        Ok(AppliedOperation {
            kind: OperationKind::Update,
            block_id: id.clone(),
            previous,
            next: BlockSnapshot::capture(self, &id),
        })
    }

    fn duplicate_block(&mut self, op: &BlockOperation) -> Result<AppliedOperation, EditError> {
        let id = self.existing_id(op)?;
        let source = self.block(&id).cloned().ok_or_else(|| EditError::NotFound(id.clone()))?;
        let copy_id = self.fresh_id(source.kind);
        let copy = Block {
            id: copy_id.clone(),
            order: 0,
            ..source.clone()
        };
        self.insert_at(copy, Some(source.order + 1));
        Ok(AppliedOperation {
            kind: OperationKind::Duplicate,
            block_id: copy_id.clone(),
            previous: None,
            next: BlockSnapshot::capture(self, &copy_id),
        })
    }

    /// Put a captured subtree back exactly where it was recorded.
    ///
    /// Any blocks of the snapshot still in the tree are taken out first, so
    /// this reverts moves and updates as well as removals.
    pub fn restore_snapshot(&mut self, snapshot: &BlockSnapshot) -> Result<(), EditError> {
        let root = snapshot.root().clone();
        if let Some(parent) = &root.parent_id {
            if snapshot.ids().any(|id| id == parent) {
                return Err(EditError::invalid("snapshot root is its own ancestor"));
            }
            if !self.contains(parent) {
                return Err(EditError::NotFound(parent.clone()));
            }
        }

        if self.contains(&root.id) {
            self.remove_subtree(&root.id);
        }
        let ids: Vec<&str> = snapshot.ids().collect();
        let mut displaced: Vec<GroupKey> = Vec::new();
        self.blocks.retain(|b| {
            if ids.contains(&b.id.as_str()) {
                displaced.push(b.group());
                false
            } else {
                true
            }
        });
        for key in &displaced {
            self.renumber(key);
        }

        let position = root.order;
        self.insert_at(root, Some(position));
        self.blocks.extend(snapshot.blocks[1..].iter().cloned());
        for parent in &ids {
            for key in self.groups() {
                if key.parent_id.as_deref() == Some(*parent) {
                    self.renumber(&key);
                }
            }
        }
        Ok(())
    }

    /// Take out the subtree rooted at the snapshot's root.
    pub fn discard_snapshot(&mut self, snapshot: &BlockSnapshot) -> Result<(), EditError> {
        let root = &snapshot.root().id;
        if !self.contains(root) {
            return Err(EditError::NotFound(root.clone()));
        }
        self.remove_subtree(root);
        Ok(())
    }

    fn existing_id(&self, op: &BlockOperation) -> Result<String, EditError> {
        let id = op
            .block_id
            .as_deref()
            .ok_or_else(|| EditError::invalid("blockId is required"))?;
        if self.contains(id) {
            Ok(id.to_string())
        } else {
            Err(EditError::NotFound(id.to_string()))
        }
    }

    fn fresh_id(&self, kind: BlockKind) -> String {
        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let id = format!("{}-{}", kind.tag(), &suffix[..8]);
            if !self.contains(&id) {
                return id;
            }
        }
    }
}

fn data_object(op: &BlockOperation) -> Result<&Map<String, Value>, EditError> {
    match &op.data {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(EditError::invalid("data must be an object")),
        None => Err(EditError::invalid(format!("{:?} requires data", op.operation))),
    }
}

fn optional_string(data: &Map<String, Value>, key: &str) -> Result<Option<String>, EditError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(EditError::invalid(format!("'{key}' must be a string"))),
    }
}
