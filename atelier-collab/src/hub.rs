//! The synchronizer: every client request lands here.
//!
//! Each room is a single writer. A request locks its room, applies one
//! state transition, broadcasts the result while still holding the lock
//! (so broadcast order equals apply order), then releases it. Store I/O runs
//! on the blocking pool with no room lock held.
//!
//! A request either fully succeeds (state changed, history recorded,
//! broadcast sent) or fully fails (nothing changed, only the caller hears
//! about it through the returned error).

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use atelier_core::{
    now_millis, BlockOperation, BlockSnapshot, GeneratedTheme, HistoryEntry, ThemeEditingState,
    DEFAULT_HISTORY_DEPTH,
};

use crate::broadcast::{BroadcastStats, RoomEvent};
use crate::error::SyncError;
use crate::identity::IdentityVerifier;
use crate::presence::{presence_color, DEFAULT_CURSOR_INTERVAL};
use crate::protocol::{ActiveUser, BlockChange, ChangeOrigin, ServerMessage};
use crate::room::{Member, Room, RoomRegistry, RoomSettings, RoomState};
use crate::session::{Session, SessionRegistry};
use crate::store::{StoreError, ThemeStore};

/// Limits and tuning consumed by the synchronizer.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub broadcast_capacity: usize,
    pub max_members_per_room: usize,
    pub max_rooms: usize,
    pub max_sessions: usize,
    pub history_depth: usize,
    pub cursor_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            max_members_per_room: 100,
            max_rooms: 1024,
            max_sessions: 4096,
            history_depth: DEFAULT_HISTORY_DEPTH,
            cursor_interval: DEFAULT_CURSOR_INTERVAL,
        }
    }
}

/// Overlay and member list of a room at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub theme_id: String,
    pub overlay: BTreeMap<String, Value>,
    pub users: Vec<ActiveUser>,
}

impl RoomSnapshot {
    fn capture(theme_id: &str, state: &RoomState) -> Self {
        Self {
            theme_id: theme_id.to_string(),
            overlay: state.overlay.snapshot(),
            users: state.active_users(),
        }
    }

    pub fn sync_state(&self) -> ServerMessage {
        ServerMessage::SyncState {
            theme_id: self.theme_id.clone(),
            overlay: self.overlay.clone(),
        }
    }

    pub fn active_users(&self) -> ServerMessage {
        ServerMessage::ActiveUsers {
            users: self.users.clone(),
        }
    }
}

/// Result of `join`.
pub struct JoinOutcome {
    pub snapshot: RoomSnapshot,
    /// Fresh subscription when the session entered a new room; `None` when
    /// it only changed page inside the room it was already in.
    pub receiver: Option<broadcast::Receiver<Arc<RoomEvent>>>,
}

/// Room-level undo or redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Undo,
    Redo,
}

impl HistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryAction::Undo => "undo",
            HistoryAction::Redo => "redo",
        }
    }
}

/// Session registry, room registry and the collaborators they consume.
pub struct CollabHub {
    config: HubConfig,
    sessions: RwLock<SessionRegistry>,
    rooms: RoomRegistry,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn ThemeStore>,
}

impl CollabHub {
    pub fn new(config: HubConfig, verifier: Arc<dyn IdentityVerifier>, store: Arc<dyn ThemeStore>) -> Self {
        let rooms = RoomRegistry::new(
            RoomSettings {
                broadcast_capacity: config.broadcast_capacity,
                history_depth: config.history_depth,
                cursor_interval: config.cursor_interval,
            },
            config.max_rooms,
        );
        Self {
            sessions: RwLock::new(SessionRegistry::new(config.max_sessions)),
            rooms,
            config,
            verifier,
            store,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ── Session & room lifecycle ──────────────────────────────────────

    /// Verify a credential and open a session for it.
    pub async fn authenticate(&self, credential: &str) -> Result<Session, SyncError> {
        let identity = self.verifier.verify(credential)?;
        let session = self.sessions.write().await.register(identity)?;
        log::info!(
            "Session {} opened for {} ({:?})",
            session.session_id,
            session.subject_id,
            session.role
        );
        Ok(session)
    }

    /// Enter a theme's room, leaving any other room first.
    ///
    /// Joining the room the session is already in only updates its page and
    /// re-announces it to the other members.
    pub async fn join(&self, session_id: Uuid, theme_id: &str, page: Option<String>) -> Result<JoinOutcome, SyncError> {
        if theme_id.is_empty() {
            return Err(SyncError::InvalidOperation("themeId must not be empty".into()));
        }
        let session = self.session_or_not_found(session_id).await?;

        match session.theme_id.as_deref() {
            Some(current) if current == theme_id => return self.change_page(&session, theme_id, page).await,
            Some(_) => {
                self.leave(session_id).await?;
            }
            None => {}
        }

        loop {
            let room = match self.rooms.get(theme_id).await {
                Some(room) => room,
                None => {
                    let editing = self.load_editing_state(theme_id).await?;
                    self.rooms.get_or_insert(editing).await?
                }
            };

            let mut state = room.lock().await;
            if room.is_closed() {
                // Emptied while we waited for the lock; take a fresh room.
                continue;
            }
            if state.members.len() >= self.config.max_members_per_room {
                return Err(SyncError::CapacityExceeded(format!(
                    "theme {theme_id} already has {} members",
                    self.config.max_members_per_room
                )));
            }

            let member = Member {
                session_id,
                subject_id: session.subject_id.clone(),
                role: session.role,
                page: page.clone(),
                color: presence_color(session_id),
            };
            state.members.insert(session_id, member.clone());
            let receiver = room.broadcast().subscribe();
            announce(&room, RoomEvent::to_others(session_id, joined_message(&member)));
            let snapshot = RoomSnapshot::capture(theme_id, &state);
            let members = state.members.len();
            drop(state);

            self.sessions.write().await.enter_room(&session_id, theme_id, page);
            log::info!(
                "{} ({session_id}) joined theme {theme_id} ({members} members)",
                session.subject_id
            );
            return Ok(JoinOutcome {
                snapshot,
                receiver: Some(receiver),
            });
        }
    }

    async fn change_page(&self, session: &Session, theme_id: &str, page: Option<String>) -> Result<JoinOutcome, SyncError> {
        let room = self.rooms.get(theme_id).await.ok_or(SyncError::NotInRoom)?;
        let mut state = room.lock().await;
        let member = state
            .members
            .get_mut(&session.session_id)
            .ok_or(SyncError::NotInRoom)?;
        member.page = page.clone();
        let member = member.clone();
        announce(&room, RoomEvent::to_others(session.session_id, joined_message(&member)));
        let snapshot = RoomSnapshot::capture(theme_id, &state);
        drop(state);

        self.sessions
            .write()
            .await
            .enter_room(&session.session_id, theme_id, page);
        log::debug!("{} moved to page {:?} in theme {theme_id}", session.subject_id, member.page);
        Ok(JoinOutcome {
            snapshot,
            receiver: None,
        })
    }

    /// Leave the current room. Returns `false` when the session was in no
    /// room; calling it twice is harmless.
    pub async fn leave(&self, session_id: Uuid) -> Result<bool, SyncError> {
        let Some(theme_id) = self.sessions.write().await.exit_room(&session_id) else {
            return Ok(false);
        };
        let Some(room) = self.rooms.get(&theme_id).await else {
            return Ok(false);
        };

        let mut state = room.lock().await;
        let Some(member) = state.members.remove(&session_id) else {
            return Ok(false);
        };
        state.presence.forget(&session_id);
        let emptied = state.members.is_empty();
        if emptied {
            room.close();
        } else {
            announce(
                &room,
                RoomEvent::to_others(
                    session_id,
                    ServerMessage::UserLeft {
                        subject_id: member.subject_id.clone(),
                        session_id,
                    },
                ),
            );
        }
        drop(state);

        log::info!("{} ({session_id}) left theme {theme_id}", member.subject_id);
        if emptied {
            // Overlay, presence and history die with the room.
            self.rooms.remove_if_closed(&room).await;
        }
        Ok(true)
    }

    /// Connection teardown: leave unconditionally, then drop the session.
    pub async fn disconnect(&self, session_id: Uuid) {
        if let Err(e) = self.leave(session_id).await {
            log::warn!("Leave on disconnect failed for {session_id}: {e}");
        }
        if let Some(session) = self.sessions.write().await.remove(&session_id) {
            log::info!("Session {session_id} closed for {}", session.subject_id);
        }
    }

    // ── Preview overlay & presence ────────────────────────────────────

    /// Record a preview value and echo it to every member.
    pub async fn apply_preview(&self, session_id: Uuid, path: &str, value: Value, temporary: bool) -> Result<(), SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        state.overlay.apply(path, &value, temporary)?;
        announce(
            &room,
            RoomEvent::to_all(ServerMessage::PreviewChange {
                path: path.to_string(),
                value,
                temporary,
                acting_subject_id: session.subject_id,
                session_id,
            }),
        );
        Ok(())
    }

    /// Current overlay and members of the session's room.
    pub async fn request_sync(&self, session_id: Uuid) -> Result<RoomSnapshot, SyncError> {
        let (_, room) = self.room_of(session_id).await?;
        let state = room.lock().await;
        Ok(RoomSnapshot::capture(room.theme_id(), &state))
    }

    pub async fn clear_preview(&self, session_id: Uuid) -> Result<(), SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        state.overlay.clear();
        announce(
            &room,
            RoomEvent::to_all(ServerMessage::PreviewCleared {
                subject_id: session.subject_id,
                session_id,
            }),
        );
        log::debug!("Preview cleared in theme {}", room.theme_id());
        Ok(())
    }

    pub async fn select_block(&self, session_id: Uuid, block_id: Option<String>) -> Result<(), SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        state.presence.select(session_id, block_id.clone());
        announce(
            &room,
            RoomEvent::to_others(
                session_id,
                ServerMessage::UserSelection {
                    subject_id: session.subject_id,
                    session_id,
                    block_id,
                },
            ),
        );
        Ok(())
    }

    /// Relay a cursor move to the other members. Returns `false` when the
    /// move was throttled.
    pub async fn cursor_move(&self, session_id: Uuid, x: f64, y: f64, block_id: Option<String>) -> Result<bool, SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        if !state.presence.move_cursor(session_id) {
            return Ok(false);
        }
        announce(
            &room,
            RoomEvent::to_others(
                session_id,
                ServerMessage::UserCursor {
                    subject_id: session.subject_id,
                    session_id,
                    x,
                    y,
                    block_id,
                },
            ),
        );
        log::trace!("Cursor from {session_id} relayed in theme {}", room.theme_id());
        Ok(true)
    }

    // ── Structural edits & history ────────────────────────────────────

    /// Validate and apply one block operation, record it and broadcast the
    /// resulting `blockChange` to every member.
    pub async fn apply_block_operation(&self, session_id: Uuid, op: BlockOperation) -> Result<BlockChange, SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        let applied = state.editing.apply_operation(&op)?;
        let timestamp = now_millis();
        state
            .history
            .record(HistoryEntry::from_applied(&applied, session.subject_id.clone(), timestamp));

        let removed_ids = applied.removed_ids();
        let position = state.editing.block(&applied.block_id).map(|b| b.order).or(op.position);
        let change = BlockChange {
            block_id: applied.block_id.clone(),
            operation: op.operation,
            data: op.data,
            position,
            origin: ChangeOrigin::Edit,
            blocks: applied.affected_blocks(),
            removed_ids,
            acting_subject_id: session.subject_id,
            session_id,
            timestamp,
        };
        announce(&room, RoomEvent::to_all(ServerMessage::BlockChange(change.clone())));
        clear_stale_selections(&room, &mut state, &change.removed_ids);
        Ok(change)
    }

    pub async fn undo(&self, session_id: Uuid) -> Result<BlockChange, SyncError> {
        self.step_history(session_id, HistoryAction::Undo).await
    }

    pub async fn redo(&self, session_id: Uuid) -> Result<BlockChange, SyncError> {
        self.step_history(session_id, HistoryAction::Redo).await
    }

    /// Undo or redo the room's most recent change, whoever made it.
    async fn step_history(&self, session_id: Uuid, action: HistoryAction) -> Result<BlockChange, SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        let RoomState { editing, history, .. } = &mut *state;
        let (entry, origin) = match action {
            HistoryAction::Undo => (history.undo(editing)?, ChangeOrigin::Undo),
            HistoryAction::Redo => (history.redo(editing)?, ChangeOrigin::Redo),
        };
        let (shown, gone) = match action {
            HistoryAction::Undo => (&entry.previous_state, &entry.new_state),
            HistoryAction::Redo => (&entry.new_state, &entry.previous_state),
        };

        let blocks = shown
            .as_ref()
            .map(|snapshot| state.editing.subtree(&snapshot.root().id))
            .unwrap_or_default();
        let removed_ids: Vec<String> = gone
            .iter()
            .flat_map(BlockSnapshot::ids)
            .filter(|id| !state.editing.contains(id))
            .map(str::to_string)
            .collect();

        let change = BlockChange {
            block_id: entry.block_id.clone(),
            operation: entry.operation_kind,
            data: None,
            position: blocks.first().map(|b| b.order),
            origin,
            blocks,
            removed_ids,
            acting_subject_id: session.subject_id,
            session_id,
            timestamp: now_millis(),
        };
        announce(&room, RoomEvent::to_all(ServerMessage::BlockChange(change.clone())));
        clear_stale_selections(&room, &mut state, &change.removed_ids);
        log::debug!(
            "{} of {:?} on {} in theme {} (originally by {})",
            action.as_str(),
            entry.operation_kind,
            entry.block_id,
            room.theme_id(),
            entry.acting_subject_id
        );
        Ok(change)
    }

    /// Merge or replace settings sections and broadcast the full result as
    /// `themeUpdated{kind:"settings"}`.
    pub async fn update_settings(&self, session_id: Uuid, patch: Value, merge: bool) -> Result<Value, SyncError> {
        let (_, room) = self.room_of(session_id).await?;
        let mut state = room.lock().await;
        state.editing.update_settings(&patch, merge)?;
        let settings = state.editing.settings.clone();
        announce(
            &room,
            RoomEvent::to_all(ServerMessage::ThemeUpdated {
                kind: "settings".into(),
                data: settings.clone(),
                timestamp: now_millis(),
            }),
        );
        Ok(settings)
    }

    /// Apply a generator payload as one settings merge followed by one
    /// `add` per block. Each step is broadcast and recorded on its own.
    pub async fn apply_generated_theme(&self, session_id: Uuid, theme: GeneratedTheme) -> Result<Vec<BlockChange>, SyncError> {
        let (settings, ops) = theme.into_operations();
        if let Some(patch) = settings {
            self.update_settings(session_id, patch, true).await?;
        }
        let mut changes = Vec::with_capacity(ops.len());
        for op in ops {
            changes.push(self.apply_block_operation(session_id, op).await?);
        }
        log::info!("Applied generated theme: {} blocks added", changes.len());
        Ok(changes)
    }

    /// Commit the editing state through the Theme Store, then clear the
    /// overlay and (if `notify`) broadcast `changesSaved`. Returns the
    /// `changesSaved` acknowledgment either way.
    ///
    /// Saves of one room commit one at a time in arrival order, so a slow
    /// commit can never land over a later one. A failed commit leaves the
    /// overlay untouched; a successful one keeps overlay values submitted
    /// while it ran.
    pub async fn save_changes(&self, session_id: Uuid, notify: bool) -> Result<ServerMessage, SyncError> {
        let (session, room) = self.room_of(session_id).await?;
        let _commit = room.lock_commit().await;
        let (editing, saved_overlay) = {
            let state = room.lock().await;
            (state.editing.clone(), state.overlay.snapshot())
        };

        let store = self.store.clone();
        let theme_id = room.theme_id().to_string();
        tokio::task::spawn_blocking(move || store.commit(&theme_id, &editing))
            .await
            .map_err(|e| StoreError::Io(format!("store task failed: {e}")))?
            .inspect_err(|e| log::error!("Commit of theme {} failed: {e}", room.theme_id()))?;

        let saved = ServerMessage::ChangesSaved {
            subject_id: session.subject_id.clone(),
            session_id,
            timestamp: now_millis(),
        };
        let mut state = room.lock().await;
        state.overlay.clear_saved(&saved_overlay);
        if notify {
            announce(&room, RoomEvent::to_all(saved.clone()));
        }
        log::info!("Theme {} saved by {}", room.theme_id(), session.subject_id);
        Ok(saved)
    }

    // ── Internal push API ─────────────────────────────────────────────

    /// Deliver a message to every member of a theme's room. Returns `false`
    /// when nobody is editing the theme.
    pub async fn broadcast_to_theme(&self, theme_id: &str, message: ServerMessage) -> bool {
        let Some(room) = self.rooms.get(theme_id).await else {
            return false;
        };
        let _state = room.lock().await;
        if room.is_closed() {
            return false;
        }
        announce(&room, RoomEvent::to_all(message));
        true
    }

    /// Push a `themeUpdated{kind, data}` into a live room.
    pub async fn notify_theme_update(&self, theme_id: &str, kind: &str, data: Value) -> bool {
        self.broadcast_to_theme(
            theme_id,
            ServerMessage::ThemeUpdated {
                kind: kind.to_string(),
                data,
                timestamp: now_millis(),
            },
        )
        .await
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub async fn session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Live editing state of a theme, if a room is open for it.
    pub async fn editing_state(&self, theme_id: &str) -> Option<ThemeEditingState> {
        let room = self.rooms.get(theme_id).await?;
        let state = room.lock().await;
        Some(state.editing.clone())
    }

    /// `(undo depth, redo depth)` of a theme's room.
    pub async fn history_depths(&self, theme_id: &str) -> Option<(usize, usize)> {
        let room = self.rooms.get(theme_id).await?;
        let state = room.lock().await;
        Some((state.history.undo_depth(), state.history.redo_depth()))
    }

    pub async fn room_stats(&self, theme_id: &str) -> Option<BroadcastStats> {
        self.rooms.get(theme_id).await.map(|room| room.broadcast().stats())
    }

    /// Record events a member's receiver skipped.
    pub async fn note_lagged(&self, theme_id: &str, skipped: u64) {
        if let Some(room) = self.rooms.get(theme_id).await {
            room.broadcast().note_lagged(skipped);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.len().await
    }

    pub async fn active_themes(&self) -> Vec<String> {
        self.rooms.active_themes().await
    }

    // ── Helpers ───────────────────────────────────────────────────────

    async fn session_or_not_found(&self, session_id: Uuid) -> Result<Session, SyncError> {
        self.session(session_id)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("session {session_id}")))
    }

    /// The session and the room it is in.
    async fn room_of(&self, session_id: Uuid) -> Result<(Session, Arc<Room>), SyncError> {
        let session = self.session_or_not_found(session_id).await?;
        let theme_id = session.theme_id.as_deref().ok_or(SyncError::NotInRoom)?;
        let room = self.rooms.get(theme_id).await.ok_or(SyncError::NotInRoom)?;
        Ok((session, room))
    }

    async fn load_editing_state(&self, theme_id: &str) -> Result<ThemeEditingState, SyncError> {
        let store = self.store.clone();
        let id = theme_id.to_string();
        let editing = tokio::task::spawn_blocking(move || store.load_editing_state(&id))
            .await
            .map_err(|e| StoreError::Io(format!("store task failed: {e}")))??;
        log::debug!("Loaded theme {theme_id} ({} blocks)", editing.len());
        Ok(editing)
    }
}

fn joined_message(member: &Member) -> ServerMessage {
    ServerMessage::UserJoined {
        subject_id: member.subject_id.clone(),
        session_id: member.session_id,
        page: member.page.clone(),
        color: member.color.clone(),
    }
}

/// Announce cleared selections for members whose selected block was just
/// removed. Goes out after the `blockChange` that removed it.
fn clear_stale_selections(room: &Room, state: &mut RoomState, removed_ids: &[String]) {
    for session_id in state.presence.forget_blocks(removed_ids) {
        let Some(member) = state.members.get(&session_id) else {
            continue;
        };
        announce(
            room,
            RoomEvent::to_all(ServerMessage::UserSelection {
                subject_id: member.subject_id.clone(),
                session_id,
                block_id: None,
            }),
        );
    }
}

/// Send a room event, logging (never failing) on encode errors.
fn announce(room: &Room, event: Result<RoomEvent, crate::protocol::ProtocolError>) {
    match event {
        Ok(event) => {
            room.broadcast().send(event);
        }
        Err(e) => log::error!("Dropping event for theme {}: {e}", room.theme_id()),
    }
}
