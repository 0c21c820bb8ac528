//! # atelier-core: Theme editing model
//!
//! Pure, synchronous state for one theme under live edit. No I/O and no
//! locking: the collaboration layer owns one [`ThemeEditingState`] and one
//! [`HistoryManager`] per room and serialises access to them.
//!
//! ```text
//! BlockOperation ──► ThemeEditingState::apply_operation ──► AppliedOperation
//!                            │                                   │
//!                            │ (block tree, dense sibling order) │
//!                            ▼                                   ▼
//!                    update_settings(patch, merge)       HistoryManager::record
//!                                                          undo() / redo()
//! ```
//!
//! ## Modules
//!
//! - [`block`]: closed block vocabulary, zones, `Block`
//! - [`state`]: `ThemeEditingState` and tree helpers
//! - [`ops`]: block operation processor
//! - [`history`]: shared undo/redo stacks
//! - [`settings`]: deep-merge / replace of settings sections
//! - [`generated`]: generator payloads broken down into operations

pub mod block;
pub mod error;
pub mod generated;
pub mod history;
pub mod ops;
pub mod settings;
pub mod state;

pub use block::{Block, BlockKind, GroupKey, Zone};
pub use error::EditError;
pub use generated::{GeneratedBlock, GeneratedTheme};
pub use history::{HistoryEntry, HistoryManager, DEFAULT_HISTORY_DEPTH};
pub use ops::{AppliedOperation, BlockOperation, BlockSnapshot, OperationKind};
pub use settings::deep_merge;
pub use state::ThemeEditingState;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
