//! JSON wire protocol, one text frame per message.
//!
//! Every message is an object tagged by `"type"`; tags and field names are
//! camelCase:
//! ```text
//! client → server   {"type":"blockUpdate","blockId":"hero-1","operation":"update","data":{…}}
//! server → client   {"type":"blockChange","blockId":"hero-1",…,"sessionId":"…","timestamp":…}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use atelier_core::{Block, BlockOperation, OperationKind};

use crate::session::Role;

fn default_true() -> bool {
    true
}

/// Messages sent by an editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinTheme {
        theme_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_slug: Option<String>,
    },
    LeaveTheme {},
    PreviewUpdate {
        path: String,
        value: Value,
        #[serde(default)]
        temporary: bool,
    },
    BlockUpdate(BlockOperation),
    SelectBlock {
        #[serde(default)]
        block_id: Option<String>,
    },
    CursorMove {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    RequestSync {},
    ClearPreviewChanges {},
    SaveChanges {
        #[serde(default = "default_true")]
        notify: bool,
    },
    Undo {},
    Redo {},
    UpdateSettings {
        patch: Value,
        #[serde(default = "default_true")]
        merge: bool,
    },
}

impl ClientMessage {
    /// Wire tag, echoed back in error acknowledgments.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinTheme { .. } => "joinTheme",
            ClientMessage::LeaveTheme {} => "leaveTheme",
            ClientMessage::PreviewUpdate { .. } => "previewUpdate",
            ClientMessage::BlockUpdate(_) => "blockUpdate",
            ClientMessage::SelectBlock { .. } => "selectBlock",
            ClientMessage::CursorMove { .. } => "cursorMove",
            ClientMessage::RequestSync {} => "requestSync",
            ClientMessage::ClearPreviewChanges {} => "clearPreviewChanges",
            ClientMessage::SaveChanges { .. } => "saveChanges",
            ClientMessage::Undo {} => "undo",
            ClientMessage::Redo {} => "redo",
            ClientMessage::UpdateSettings { .. } => "updateSettings",
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Error tag carried by `error` acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    AuthenticationFailure,
    NotFound,
    InvalidOperation,
    EmptyHistory,
    CapacityExceeded,
    StoreFailure,
    Timeout,
}

/// What produced a `blockChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOrigin {
    Edit,
    Undo,
    Redo,
}

/// Confirmed structural change, broadcast to every member including the
/// sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockChange {
    pub block_id: String,
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub origin: ChangeOrigin,
    /// Affected subtree as it now stands, root first.
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Ids that no longer exist after this change.
    #[serde(default)]
    pub removed_ids: Vec<String>,
    pub acting_subject_id: String,
    pub session_id: Uuid,
    pub timestamp: u64,
}

/// One room member as reported to editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub subject_id: String,
    pub session_id: Uuid,
    pub page: Option<String>,
    pub role: Role,
    /// Stable `#rrggbb` presence colour.
    pub color: String,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        session_id: Uuid,
        subject_id: String,
    },
    Error {
        message: String,
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<String>,
    },
    UserJoined {
        subject_id: String,
        session_id: Uuid,
        page: Option<String>,
        color: String,
    },
    UserLeft {
        subject_id: String,
        session_id: Uuid,
    },
    SyncState {
        theme_id: String,
        overlay: BTreeMap<String, Value>,
    },
    ActiveUsers {
        users: Vec<ActiveUser>,
    },
    PreviewChange {
        path: String,
        value: Value,
        temporary: bool,
        acting_subject_id: String,
        session_id: Uuid,
    },
    BlockChange(BlockChange),
    UserSelection {
        subject_id: String,
        session_id: Uuid,
        block_id: Option<String>,
    },
    UserCursor {
        subject_id: String,
        session_id: Uuid,
        x: f64,
        y: f64,
        block_id: Option<String>,
    },
    PreviewCleared {
        subject_id: String,
        session_id: Uuid,
    },
    ChangesSaved {
        subject_id: String,
        session_id: Uuid,
        timestamp: u64,
    },
    /// `kind` is the update category (e.g. `"settings"`).
    ThemeUpdated {
        kind: String,
        data: Value,
        timestamp: u64,
    },
    /// Undo/redo found nothing to act on; sent to the requester only.
    HistoryEmpty {
        action: String,
    },
}

impl ServerMessage {
    pub fn error(kind: ErrorKind, message: impl Into<String>, request: Option<&str>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            kind,
            request: request.map(str::to_string),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionFailed(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join_theme() {
        let msg = ClientMessage::decode(r#"{"type":"joinTheme","themeId":"T1","pageSlug":"home"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinTheme {
                theme_id: "T1".into(),
                page_slug: Some("home".into())
            }
        );
        let msg = ClientMessage::decode(r#"{"type":"joinTheme","themeId":"T1"}"#).unwrap();
        assert_eq!(msg.type_name(), "joinTheme");
    }

    #[test]
    fn test_decode_block_update_flattened() {
        let msg = ClientMessage::decode(
            r#"{"type":"blockUpdate","blockId":"hero-1","operation":"update","data":{"title":"Hi"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::BlockUpdate(op) => {
                assert_eq!(op.block_id.as_deref(), Some("hero-1"));
                assert_eq!(op.operation, OperationKind::Update);
                assert_eq!(op.data.unwrap()["title"], "Hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_defaults() {
        match ClientMessage::decode(r##"{"type":"previewUpdate","path":"settings.colors.primary","value":"#fff"}"##).unwrap() {
            ClientMessage::PreviewUpdate { temporary, .. } => assert!(!temporary),
            other => panic!("unexpected {other:?}"),
        }
        match ClientMessage::decode(r#"{"type":"saveChanges"}"#).unwrap() {
            ClientMessage::SaveChanges { notify } => assert!(notify),
            other => panic!("unexpected {other:?}"),
        }
        match ClientMessage::decode(r#"{"type":"selectBlock","blockId":null}"#).unwrap() {
            ClientMessage::SelectBlock { block_id } => assert!(block_id.is_none()),
            other => panic!("unexpected {other:?}"),
        }
        match ClientMessage::decode(r#"{"type":"updateSettings","patch":{"a":1}}"#).unwrap() {
            ClientMessage::UpdateSettings { merge, .. } => assert!(merge),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            ClientMessage::decode(r#"{"type":"leaveTheme"}"#).unwrap(),
            ClientMessage::LeaveTheme {}
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(ClientMessage::decode(r#"{"type":"dropDatabase"}"#).is_err());
        assert!(ClientMessage::decode("not json").is_err());
        assert!(ClientMessage::decode(r#"{"type":"cursorMove","x":"left"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let session_id = Uuid::new_v4();
        let msg = ServerMessage::UserCursor {
            subject_id: "alice".into(),
            session_id,
            x: 10.0,
            y: 20.0,
            block_id: None,
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "userCursor");
        assert_eq!(value["subjectId"], "alice");
        assert_eq!(value["sessionId"], session_id.to_string());
        assert_eq!(value["x"], 10.0);
    }

    #[test]
    fn test_block_change_flattened_into_message() {
        let change = BlockChange {
            block_id: "b2".into(),
            operation: OperationKind::Add,
            data: Some(json!({"type": "hero"})),
            position: None,
            origin: ChangeOrigin::Edit,
            blocks: Vec::new(),
            removed_ids: Vec::new(),
            acting_subject_id: "alice".into(),
            session_id: Uuid::nil(),
            timestamp: 5,
        };
        let text = ServerMessage::BlockChange(change.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "blockChange");
        assert_eq!(value["operation"], "add");
        assert_eq!(value["origin"], "edit");
        assert_eq!(value["actingSubjectId"], "alice");
        assert_eq!(ServerMessage::decode(&text).unwrap(), ServerMessage::BlockChange(change));
    }

    #[test]
    fn test_error_ack_shape() {
        let msg = ServerMessage::error(ErrorKind::NotFound, "Block not found: x", Some("blockUpdate"));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "notFound");
        assert_eq!(value["request"], "blockUpdate");
    }
}
