//! Errors surfaced by the synchronizer.

use atelier_core::EditError;

use crate::protocol::ErrorKind;
use crate::store::StoreError;

/// Why a request was refused. A refused request never produces a
/// broadcast; only the requester hears about it.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// Missing or invalid credential. The connection is closed.
    AuthenticationFailure(String),
    /// Unknown block, session or room.
    NotFound(String),
    /// Malformed payload or an edit that would break the tree.
    InvalidOperation(String),
    /// Undo/redo with nothing to act on.
    EmptyHistory,
    /// Session, room or membership limit reached.
    CapacityExceeded(String),
    /// The session has not joined a theme.
    NotInRoom,
    /// The Theme Store failed.
    Store(StoreError),
}

impl SyncError {
    /// Tag reported in `error` acknowledgments.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            SyncError::NotFound(_) | SyncError::NotInRoom => ErrorKind::NotFound,
            SyncError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            SyncError::EmptyHistory => ErrorKind::EmptyHistory,
            SyncError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            SyncError::Store(_) => ErrorKind::StoreFailure,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::AuthenticationFailure(e) => write!(f, "Authentication failed: {e}"),
            SyncError::NotFound(what) => write!(f, "Not found: {what}"),
            SyncError::InvalidOperation(e) => write!(f, "Invalid operation: {e}"),
            SyncError::EmptyHistory => write!(f, "Nothing to undo or redo"),
            SyncError::CapacityExceeded(what) => write!(f, "Capacity exceeded: {what}"),
            SyncError::NotInRoom => write!(f, "Not in a theme room"),
            SyncError::Store(e) => write!(f, "Theme store error: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<EditError> for SyncError {
    fn from(e: EditError) -> Self {
        match e {
            EditError::NotFound(id) => SyncError::NotFound(format!("block {id}")),
            EditError::InvalidOperation(reason) => SyncError::InvalidOperation(reason),
            EditError::EmptyHistory => SyncError::EmptyHistory,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_errors_map_to_kinds() {
        let err: SyncError = EditError::NotFound("hero-1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Not found: block hero-1");

        let err: SyncError = EditError::invalid("cycle").into();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        let err: SyncError = EditError::EmptyHistory.into();
        assert_eq!(err.kind(), ErrorKind::EmptyHistory);
    }

    #[test]
    fn test_not_in_room_reports_not_found() {
        assert_eq!(SyncError::NotInRoom.kind(), ErrorKind::NotFound);
        assert_eq!(
            SyncError::Store(StoreError::Io("disk full".into())).kind(),
            ErrorKind::StoreFailure
        );
    }
}
