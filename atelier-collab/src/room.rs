//! Room Registry: one live collaboration context per theme.
//!
//! ```text
//! RoomRegistry ── theme_id ──► Arc<Room>
//!                                ├── BroadcastGroup (fan-out)
//!                                └── Mutex<RoomState>
//!                                      ├── members
//!                                      ├── PreviewOverlay
//!                                      ├── ThemeEditingState
//!                                      ├── HistoryManager
//!                                      └── PresenceState
//! ```
//!
//! A room exists only while it has members. The member that empties a room
//! marks it closed while still holding the room lock, then unregisters it;
//! a joiner that raced onto a closed room retries and gets a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use atelier_core::{HistoryManager, ThemeEditingState};

use crate::broadcast::BroadcastGroup;
use crate::error::SyncError;
use crate::overlay::PreviewOverlay;
use crate::presence::PresenceState;
use crate::protocol::ActiveUser;
use crate::session::Role;

/// One session inside a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub session_id: Uuid,
    pub subject_id: String,
    pub role: Role,
    pub page: Option<String>,
    pub color: String,
}

impl Member {
    pub fn active_user(&self) -> ActiveUser {
        ActiveUser {
            subject_id: self.subject_id.clone(),
            session_id: self.session_id,
            page: self.page.clone(),
            role: self.role,
            color: self.color.clone(),
        }
    }
}

/// Everything a room serialises access to.
#[derive(Debug)]
pub struct RoomState {
    pub members: HashMap<Uuid, Member>,
    pub overlay: PreviewOverlay,
    pub editing: ThemeEditingState,
    pub history: HistoryManager,
    pub presence: PresenceState,
}

impl RoomState {
    /// Members sorted by subject then session, for stable listings.
    pub fn active_users(&self) -> Vec<ActiveUser> {
        let mut users: Vec<ActiveUser> = self.members.values().map(Member::active_user).collect();
        users.sort_by(|a, b| {
            a.subject_id
                .cmp(&b.subject_id)
                .then(a.session_id.cmp(&b.session_id))
        });
        users
    }
}

/// Live collaboration context for one theme.
pub struct Room {
    theme_id: String,
    broadcast: BroadcastGroup,
    state: Mutex<RoomState>,
    /// Held across a store commit; orders saves of this room.
    commit: Mutex<()>,
    closed: AtomicBool,
}

/// Parameters applied to every new room.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub broadcast_capacity: usize,
    pub history_depth: usize,
    pub cursor_interval: Duration,
}

impl Room {
    pub fn new(editing: ThemeEditingState, settings: &RoomSettings) -> Self {
        Self {
            theme_id: editing.theme_id.clone(),
            broadcast: BroadcastGroup::new(settings.broadcast_capacity),
            state: Mutex::new(RoomState {
                members: HashMap::new(),
                overlay: PreviewOverlay::new(),
                editing,
                history: HistoryManager::with_max_depth(settings.history_depth),
                presence: PresenceState::new(settings.cursor_interval),
            }),
            commit: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn theme_id(&self) -> &str {
        &self.theme_id
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    /// Lock the room for one serialised state transition.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    /// Serialise store commits of this room. Never take the room lock
    /// first and then wait on this one.
    pub async fn lock_commit(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the room dead. Call while holding the room lock.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Maps theme ids to their rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    settings: RoomSettings,
    max_rooms: usize,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, max_rooms: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            settings,
            max_rooms,
        }
    }

    /// Live room for a theme, if anyone is editing it.
    pub async fn get(&self, theme_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .await
            .get(theme_id)
            .filter(|room| !room.is_closed())
            .cloned()
    }

    /// Return the live room for `editing.theme_id`, creating it from
    /// `editing` when absent. A closed room still registered is replaced.
    pub async fn get_or_insert(&self, editing: ThemeEditingState) -> Result<Arc<Room>, SyncError> {
        // Fast path: read lock
        if let Some(room) = self.get(&editing.theme_id).await {
            return Ok(room);
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&editing.theme_id) {
            if !room.is_closed() {
                return Ok(room.clone());
            }
        }
        let live = rooms.values().filter(|room| !room.is_closed()).count();
        if live >= self.max_rooms {
            return Err(SyncError::CapacityExceeded(format!(
                "room limit of {} reached",
                self.max_rooms
            )));
        }

        let room = Arc::new(Room::new(editing, &self.settings));
        rooms.insert(room.theme_id.clone(), room.clone());
        log::info!("Room {} created ({} active)", room.theme_id, rooms.len());
        Ok(room)
    }

    /// Unregister `room` if it is closed and still the registered room.
    pub async fn remove_if_closed(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        let registered = rooms
            .get(room.theme_id())
            .is_some_and(|current| Arc::ptr_eq(current, room));
        if registered && room.is_closed() {
            rooms.remove(room.theme_id());
            log::info!("Room {} removed (empty)", room.theme_id());
            return true;
        }
        false
    }

    /// Number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .filter(|room| !room.is_closed())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids of themes with a live room, sorted.
    pub async fn active_themes(&self) -> Vec<String> {
        let mut themes: Vec<String> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| !room.is_closed())
            .map(|room| room.theme_id.clone())
            .collect();
        themes.sort();
        themes
    }
}
