//! Session registry: one entry per authenticated connection.
//!
//! The registry exclusively owns sessions. Rooms only hold session ids.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;
use crate::identity::Identity;

/// Role granted by the identity verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// One connected editor.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: Uuid,
    pub subject_id: String,
    pub role: Role,
    /// Room currently joined.
    pub theme_id: Option<String>,
    pub viewing_page: Option<String>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            subject_id: identity.subject_id,
            role: identity.role,
            theme_id: None,
            viewing_page: None,
        }
    }
}

/// Live sessions keyed by session id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, Session>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    /// Create a session for a verified identity.
    pub fn register(&mut self, identity: Identity) -> Result<Session, SyncError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(SyncError::CapacityExceeded(format!(
                "session limit of {} reached",
                self.max_sessions
            )));
        }
        let session = Session::new(identity);
        self.sessions.insert(session.session_id, session.clone());
        Ok(session)
    }

    pub fn get(&self, session_id: &Uuid) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Record the room and page a session is in.
    pub fn enter_room(&mut self, session_id: &Uuid, theme_id: &str, page: Option<String>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.theme_id = Some(theme_id.to_string());
                session.viewing_page = page;
                true
            }
            None => false,
        }
    }

    /// Clear the session's room, returning the theme it was in.
    pub fn exit_room(&mut self, session_id: &Uuid) -> Option<String> {
        let session = self.sessions.get_mut(session_id)?;
        session.viewing_page = None;
        session.theme_id.take()
    }

    pub fn remove(&mut self, session_id: &Uuid) -> Option<Session> {
        self.sessions.remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(subject: &str) -> Identity {
        Identity {
            subject_id: subject.into(),
            role: Role::Editor,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SessionRegistry::new(4);
        let session = registry.register(identity("alice")).unwrap();
        assert_eq!(registry.len(), 1);
        let stored = registry.get(&session.session_id).unwrap();
        assert_eq!(stored.subject_id, "alice");
        assert!(stored.theme_id.is_none());
    }

    #[test]
    fn test_sessions_are_unique_per_connection() {
        let mut registry = SessionRegistry::new(4);
        let a = registry.register(identity("alice")).unwrap();
        let b = registry.register(identity("alice")).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity() {
        let mut registry = SessionRegistry::new(1);
        registry.register(identity("alice")).unwrap();
        let err = registry.register(identity("bob")).unwrap_err();
        assert!(matches!(err, SyncError::CapacityExceeded(_)));
    }

    #[test]
    fn test_enter_and_exit_room() {
        let mut registry = SessionRegistry::new(4);
        let session = registry.register(identity("alice")).unwrap();
        assert!(registry.enter_room(&session.session_id, "T1", Some("home".into())));
        assert_eq!(registry.get(&session.session_id).unwrap().theme_id.as_deref(), Some("T1"));

        assert_eq!(registry.exit_room(&session.session_id).as_deref(), Some("T1"));
        assert_eq!(registry.exit_room(&session.session_id), None);
        assert!(registry.get(&session.session_id).unwrap().theme_id.is_none());
        assert!(!registry.enter_room(&Uuid::new_v4(), "T1", None));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert!("root".parse::<Role>().is_err());
    }
}
