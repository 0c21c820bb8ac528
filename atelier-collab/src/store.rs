//! Theme Store adapters.
//!
//! The store is the source of truth once no room is open. The synchronizer
//! loads a theme's editing state on first join and commits it on save;
//! both calls run on the blocking pool, never under a room lock.
//!
//! ```text
//! joinTheme ──► load_editing_state(theme) ──► Room (in memory)
//! saveChanges ─► commit(theme, state) ──────► <data_dir>/<theme>.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use atelier_core::ThemeEditingState;

/// Theme Store errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Theme id cannot be used as a storage key
    InvalidThemeId(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// I/O error
    Io(String),
    /// Store lock poisoned by a panicking writer
    Poisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidThemeId(id) => write!(f, "Invalid theme id: {id:?}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Poisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Persistence collaborator for committed theme state.
///
/// A theme that was never committed loads as an empty editing state.
pub trait ThemeStore: Send + Sync {
    fn load_editing_state(&self, theme_id: &str) -> Result<ThemeEditingState, StoreError>;
    fn commit(&self, theme_id: &str, state: &ThemeEditingState) -> Result<(), StoreError>;
}

/// Process-local store, used when no data directory is configured.
#[derive(Debug, Default)]
pub struct MemoryThemeStore {
    themes: RwLock<HashMap<String, ThemeEditingState>>,
}

impl MemoryThemeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a theme, replacing any committed copy.
    pub fn insert(&self, state: ThemeEditingState) -> Result<(), StoreError> {
        let mut themes = self.themes.write().map_err(|_| StoreError::Poisoned)?;
        themes.insert(state.theme_id.clone(), state);
        Ok(())
    }

    /// Last committed copy, if any.
    pub fn get(&self, theme_id: &str) -> Option<ThemeEditingState> {
        self.themes.read().ok()?.get(theme_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.themes.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ThemeStore for MemoryThemeStore {
    fn load_editing_state(&self, theme_id: &str) -> Result<ThemeEditingState, StoreError> {
        let themes = self.themes.read().map_err(|_| StoreError::Poisoned)?;
        Ok(themes
            .get(theme_id)
            .cloned()
            .unwrap_or_else(|| ThemeEditingState::new(theme_id)))
    }

    fn commit(&self, theme_id: &str, state: &ThemeEditingState) -> Result<(), StoreError> {
        let mut themes = self.themes.write().map_err(|_| StoreError::Poisoned)?;
        themes.insert(theme_id.to_string(), state.clone());
        Ok(())
    }
}

/// One pretty-printed JSON document per theme under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileThemeStore {
    dir: PathBuf,
}

impl JsonFileThemeStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        log::info!("Theme store opened at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Theme ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn path_for(&self, theme_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !theme_id.is_empty()
            && theme_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidThemeId(theme_id.to_string()));
        }
        Ok(self.dir.join(format!("{theme_id}.json")))
    }

    /// Ids of every committed theme.
    pub fn list_themes(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ThemeStore for JsonFileThemeStore {
    fn load_editing_state(&self, theme_id: &str) -> Result<ThemeEditingState, StoreError> {
        let path = self.path_for(theme_id)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ThemeEditingState::new(theme_id));
            }
            Err(e) => return Err(e.into()),
        };
        let mut state: ThemeEditingState = serde_json::from_str(&text)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        state.theme_id = theme_id.to_string();
        state.normalize();
        Ok(state)
    }

    fn commit(&self, theme_id: &str, state: &ThemeEditingState) -> Result<(), StoreError> {
        let path = self.path_for(theme_id)?;
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        // Write-then-rename so a crash never leaves a half-written theme.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Committed theme {theme_id} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{Block, BlockKind, Zone};
    use serde_json::json;

    fn sample(theme_id: &str) -> ThemeEditingState {
        ThemeEditingState::with_blocks(
            theme_id,
            vec![
                Block::new("hero-1", BlockKind::Hero, Zone::Content).with_prop("title", json!("Welcome")),
                Block::new("nav-1", BlockKind::Navigation, Zone::Header),
            ],
        )
        .with_settings(json!({"colors": {"primary": "#112233"}}))
    }

    #[test]
    fn test_memory_store_unknown_theme_is_empty() {
        let store = MemoryThemeStore::new();
        let state = store.load_editing_state("T1").unwrap();
        assert_eq!(state.theme_id, "T1");
        assert!(state.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_commit_and_load() {
        let store = MemoryThemeStore::new();
        store.commit("T1", &sample("T1")).unwrap();
        let loaded = store.load_editing_state("T1").unwrap();
        assert_eq!(loaded, sample("T1"));
        assert_eq!(store.get("T1"), Some(sample("T1")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_store_commit_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileThemeStore::open(dir.path().join("themes")).unwrap();

        store.commit("T1", &sample("T1")).unwrap();
        let loaded = store.load_editing_state("T1").unwrap();
        assert_eq!(loaded, sample("T1"));
        assert_eq!(loaded.block("hero-1").unwrap().props["title"], "Welcome");
        assert_eq!(store.list_themes().unwrap(), vec!["T1".to_string()]);
    }

    #[test]
    fn test_json_store_missing_theme_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileThemeStore::open(dir.path()).unwrap();
        let state = store.load_editing_state("never-saved").unwrap();
        assert!(state.is_empty());
        assert_eq!(state.settings, json!({}));
    }

    #[test]
    fn test_json_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileThemeStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load_editing_state("../etc/passwd"),
            Err(StoreError::InvalidThemeId(_))
        ));
        assert!(matches!(
            store.commit("", &ThemeEditingState::new("")),
            Err(StoreError::InvalidThemeId(_))
        ));
    }

    #[test]
    fn test_json_store_normalizes_orders_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileThemeStore::open(dir.path()).unwrap();
        let raw = json!({
            "themeId": "T1",
            "blocks": [
                {"id": "a", "type": "text", "zone": "content", "order": 7},
                {"id": "b", "type": "text", "zone": "content", "order": 3}
            ]
        });
        fs::write(dir.path().join("T1.json"), raw.to_string()).unwrap();

        let state = store.load_editing_state("T1").unwrap();
        assert!(state.orders_are_dense());
        assert_eq!(state.block("b").unwrap().order, 0);
        assert_eq!(state.block("a").unwrap().order, 1);
    }

    #[test]
    fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileThemeStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("T1.json"), "{not json").unwrap();
        assert!(matches!(
            store.load_editing_state("T1"),
            Err(StoreError::DeserializationError(_))
        ));
    }
}
