//! # atelier-collab: Real-time collaboration layer for theme editing
//!
//! WebSocket server that lets several authenticated editors work on the same
//! theme at once: unsaved preview values, block tree edits, shared undo/redo,
//! settings merges, cursors and selections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌─────────────┐
//! │ EditorClient │ ◄────────────────► │ SyncServer  │
//! │ (per editor) │    JSON frames     │ (central)   │
//! └──────────────┘                    └──────┬──────┘
//!                                            ▼
//!                                     ┌─────────────┐     ┌─────────────┐
//!                                     │  CollabHub  │ ──► │ ThemeStore  │
//!                                     └──────┬──────┘     └─────────────┘
//!                              ┌─────────────┼──────────────┐
//!                              ▼             ▼              ▼
//!                      SessionRegistry  RoomRegistry  IdentityVerifier
//!                                            │
//!                                            ▼
//!                                  ┌───────────────────┐
//!                                  │ Room              │
//!                                  │  BroadcastGroup   │
//!                                  │  PreviewOverlay   │
//!                                  │  editing state    │
//!                                  │  history          │
//!                                  │  presence         │
//!                                  └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages
//! - [`identity`]: credential verification
//! - [`session`]: connected sessions
//! - [`room`]: per-theme rooms and their registry
//! - [`overlay`]: unsaved preview values
//! - [`presence`]: cursors, selections, presence colours
//! - [`broadcast`]: room fan-out with backpressure
//! - [`store`]: persisted theme state
//! - [`hub`]: the operations a session can perform
//! - [`server`]: WebSocket sync server
//! - [`client`]: WebSocket editor client

pub mod broadcast;
pub mod client;
pub mod error;
pub mod hub;
pub mod identity;
pub mod overlay;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomEvent};
pub use client::{ConnectionState, EditorClient, EditorEvent};
pub use error::SyncError;
pub use hub::{CollabHub, HistoryAction, HubConfig, JoinOutcome, RoomSnapshot};
pub use identity::{Identity, IdentityVerifier, StaticTokenVerifier};
pub use overlay::PreviewOverlay;
pub use presence::{presence_color, PresenceState, DEFAULT_CURSOR_INTERVAL};
pub use protocol::{
    ActiveUser, BlockChange, ChangeOrigin, ClientMessage, ErrorKind, ProtocolError, ServerMessage,
};
pub use room::{Member, Room, RoomRegistry, RoomSettings, RoomState};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{Role, Session, SessionRegistry};
pub use store::{JsonFileThemeStore, MemoryThemeStore, StoreError, ThemeStore};
