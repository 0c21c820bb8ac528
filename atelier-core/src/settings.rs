//! Partial theme-settings updates.
//!
//! A patch is an object keyed by top-level settings section. In merge mode
//! it is folded into the current settings recursively: objects merge key
//! by key, anything else (scalars, arrays, null) in the patch replaces the
//! current value. In replace mode every section named by the patch is
//! overwritten outright.

use serde_json::{Map, Value};

use crate::error::EditError;
use crate::state::ThemeEditingState;

/// Recursively fold `patch` into `target`. The patch wins on conflicts.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl ThemeEditingState {
    /// Apply a settings patch. `patch` must be a JSON object.
    pub fn update_settings(&mut self, patch: &Value, merge: bool) -> Result<(), EditError> {
        let sections = patch
            .as_object()
            .ok_or_else(|| EditError::invalid("settings patch must be an object"))?;
        if !self.settings.is_object() {
            self.settings = Value::Object(Map::new());
        }
        if merge {
            deep_merge(&mut self.settings, patch);
        } else if let Value::Object(settings) = &mut self.settings {
            for (section, value) in sections {
                settings.insert(section.clone(), value.clone());
            }
        }
        log::debug!(
            "theme {}: settings {} ({} sections)",
            self.theme_id,
            if merge { "merged" } else { "replaced" },
            sections.len()
        );
        Ok(())
    }
}
