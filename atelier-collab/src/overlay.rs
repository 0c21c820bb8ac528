//! Preview overlay: uncommitted values layered above the persisted theme.
//!
//! Keys are dotted paths such as `settings.colors.primary` or
//! `blocks[3].props.title`. The overlay lives only as long as its room.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SyncError;

/// Per-room map of path → pending value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewOverlay {
    entries: BTreeMap<String, Value>,
}

impl PreviewOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a preview value. Temporary values are never stored.
    ///
    /// Returns whether the overlay changed.
    pub fn apply(&mut self, path: &str, value: &Value, temporary: bool) -> Result<bool, SyncError> {
        validate_path(path)?;
        if temporary {
            return Ok(false);
        }
        self.entries.insert(path.to_string(), value.clone());
        Ok(true)
    }

    /// Flat copy handed to late joiners and `requestSync`.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.clone()
    }

    /// Drop the entries a save just committed. Values written after
    /// `saved` was taken stay pending.
    pub fn clear_saved(&mut self, saved: &BTreeMap<String, Value>) {
        self.entries
            .retain(|path, value| !matches!(saved.get(path), Some(committed) if committed == value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accept `segment(.segment)*` where a segment is `[A-Za-z0-9_-]+`
/// optionally followed by any number of `[digits]` indexes.
pub fn validate_path(path: &str) -> Result<(), SyncError> {
    let invalid = || SyncError::InvalidOperation(format!("invalid preview path {path:?}"));
    if path.is_empty() {
        return Err(invalid());
    }
    for segment in path.split('.') {
        let (name, mut rest) = match segment.find('[') {
            Some(i) => segment.split_at(i),
            None => (segment, ""),
        };
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid());
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(invalid)?;
            let index = &rest[1..close];
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid());
            }
        }
    }
    Ok(())
}
