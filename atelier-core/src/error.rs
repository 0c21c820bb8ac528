//! Errors raised by the editing model.

/// Reasons an edit against a [`ThemeEditingState`](crate::ThemeEditingState)
/// is rejected. A rejected edit never leaves the tree partially mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The referenced block does not exist in the theme.
    NotFound(String),
    /// The edit is malformed or would break the tree (e.g. a cycle).
    InvalidOperation(String),
    /// Undo or redo was requested with nothing to act on.
    EmptyHistory,
}

impl EditError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Block not found: {id}"),
            Self::InvalidOperation(reason) => write!(f, "Invalid operation: {reason}"),
            Self::EmptyHistory => write!(f, "Nothing to undo or redo"),
        }
    }
}

impl std::error::Error for EditError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(EditError::NotFound("hero-1".into()).to_string(), "Block not found: hero-1");
        assert_eq!(
            EditError::invalid("cycle").to_string(),
            "Invalid operation: cycle"
        );
        assert_eq!(EditError::EmptyHistory.to_string(), "Nothing to undo or redo");
    }
}
