//! Presence hints: cursors, selections and member colours.
//!
//! Presence is transient. It is relayed to other members only, never
//! written to the overlay, and dies with the room.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default minimum gap between two relayed cursor moves (30fps).
pub const DEFAULT_CURSOR_INTERVAL: Duration = Duration::from_millis(33);

/// Stable, visually distinct `#rrggbb` colour for a session.
pub fn presence_color(session_id: Uuid) -> String {
    let hue = ((session_id.as_u128() % 360) as f32) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!(
        "#{:02x}{:02x}{:02x}",
        to_channel(r),
        to_channel(g),
        to_channel(b)
    )
}

fn to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Cursor throttling and selection state of one room.
#[derive(Debug)]
pub struct PresenceState {
    /// When each session's cursor was last relayed.
    last_relayed: HashMap<Uuid, Instant>,
    selections: HashMap<Uuid, String>,
    cursor_interval: Duration,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::new(DEFAULT_CURSOR_INTERVAL)
    }
}

impl PresenceState {
    pub fn new(cursor_interval: Duration) -> Self {
        Self {
            last_relayed: HashMap::new(),
            selections: HashMap::new(),
            cursor_interval,
        }
    }

    /// Returns `false` when a cursor move arrives inside the throttle
    /// window and must not be relayed.
    pub fn move_cursor(&mut self, session_id: Uuid) -> bool {
        self.move_cursor_at(session_id, Instant::now())
    }

    fn move_cursor_at(&mut self, session_id: Uuid, now: Instant) -> bool {
        if let Some(last) = self.last_relayed.get(&session_id) {
            if now.duration_since(*last) < self.cursor_interval {
                return false;
            }
        }
        self.last_relayed.insert(session_id, now);
        true
    }

    /// Record a selection (`None` clears it).
    pub fn select(&mut self, session_id: Uuid, block_id: Option<String>) {
        match block_id {
            Some(block_id) => {
                self.selections.insert(session_id, block_id);
            }
            None => {
                self.selections.remove(&session_id);
            }
        }
    }

    /// Drop every trace of a session.
    pub fn forget(&mut self, session_id: &Uuid) {
        self.last_relayed.remove(session_id);
        self.selections.remove(session_id);
    }

    /// Clear selections pointing at blocks that no longer exist. Returns
    /// the sessions whose selection was cleared, sorted.
    pub fn forget_blocks(&mut self, removed: &[String]) -> Vec<Uuid> {
        if removed.is_empty() {
            return Vec::new();
        }
        let mut cleared: Vec<Uuid> = self
            .selections
            .iter()
            .filter(|(_, block_id)| removed.contains(block_id))
            .map(|(session_id, _)| *session_id)
            .collect();
        for session_id in &cleared {
            self.selections.remove(session_id);
        }
        cleared.sort();
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_color_stable_and_hex() {
        let id = Uuid::new_v4();
        let color = presence_color(id);
        assert_eq!(color, presence_color(id));
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_presence_color_distinct() {
        let a = presence_color(Uuid::from_u128(0));
        let b = presence_color(Uuid::from_u128(180));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hsl_to_rgb_red() {
        let (r, g, b) = hsl_to_rgb(0.0, 1.0, 0.5);
        assert!((r - 1.0).abs() < 1e-4);
        assert!(g.abs() < 1e-4);
        assert!(b.abs() < 1e-4);
        assert_eq!(presence_color(Uuid::from_u128(0)), "#e05252");
    }

    #[test]
    fn test_hsl_achromatic() {
        assert_eq!(hsl_to_rgb(0.3, 0.0, 0.25), (0.25, 0.25, 0.25));
    }

    #[test]
    fn test_cursor_throttle() {
        let mut presence = PresenceState::new(Duration::from_millis(33));
        let id = Uuid::new_v4();
        let start = Instant::now();

        assert!(presence.move_cursor_at(id, start));
        assert!(!presence.move_cursor_at(id, start + Duration::from_millis(10)));
        // A dropped move does not push the window forward.
        assert!(presence.move_cursor_at(id, start + Duration::from_millis(40)));
    }

    #[test]
    fn test_throttle_is_per_session() {
        let mut presence = PresenceState::new(Duration::from_secs(10));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(presence.move_cursor(a));
        assert!(presence.move_cursor(b));
        assert!(!presence.move_cursor(a));
    }

    #[test]
    fn test_forget_blocks_clears_matching_selections() {
        let mut presence = PresenceState::default();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        presence.select(a, Some("hero-1".into()));
        presence.select(b, Some("faq-1".into()));
        presence.select(c, Some("hero-1".into()));

        assert_eq!(presence.forget_blocks(&["hero-1".to_string()]), vec![a, c]);
        assert_eq!(presence.selections.get(&b).map(String::as_str), Some("faq-1"));
        assert!(!presence.selections.contains_key(&a));
        assert!(presence.forget_blocks(&[]).is_empty());
    }

    #[test]
    fn test_select_none_and_forget() {
        let mut presence = PresenceState::default();
        let id = Uuid::new_v4();
        presence.select(id, Some("hero-1".into()));
        presence.select(id, None);
        assert!(presence.selections.is_empty());

        presence.select(id, Some("hero-1".into()));
        presence.move_cursor(id);
        presence.forget(&id);
        assert!(presence.selections.is_empty());
        assert!(presence.last_relayed.is_empty());
    }
}
