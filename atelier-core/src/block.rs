//! Content blocks: the nodes of a theme page's content tree.
//!
//! Block kinds form a closed vocabulary. A tag outside the vocabulary is
//! rejected instead of being mapped onto a guessed kind, so an unfamiliar
//! payload can never be silently reinterpreted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::EditError;

/// Closed vocabulary of block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Hero,
    Features,
    Pricing,
    Testimonials,
    Gallery,
    Cta,
    Contact,
    Faq,
    Team,
    Stats,
    Newsletter,
    Text,
    Image,
    Video,
    Navigation,
    Columns,
    Container,
    Form,
    Divider,
    Spacer,
}

impl BlockKind {
    pub const ALL: [BlockKind; 20] = [
        BlockKind::Hero,
        BlockKind::Features,
        BlockKind::Pricing,
        BlockKind::Testimonials,
        BlockKind::Gallery,
        BlockKind::Cta,
        BlockKind::Contact,
        BlockKind::Faq,
        BlockKind::Team,
        BlockKind::Stats,
        BlockKind::Newsletter,
        BlockKind::Text,
        BlockKind::Image,
        BlockKind::Video,
        BlockKind::Navigation,
        BlockKind::Columns,
        BlockKind::Container,
        BlockKind::Form,
        BlockKind::Divider,
        BlockKind::Spacer,
    ];

    /// Wire tag of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::Hero => "hero",
            BlockKind::Features => "features",
            BlockKind::Pricing => "pricing",
            BlockKind::Testimonials => "testimonials",
            BlockKind::Gallery => "gallery",
            BlockKind::Cta => "cta",
            BlockKind::Contact => "contact",
            BlockKind::Faq => "faq",
            BlockKind::Team => "team",
            BlockKind::Stats => "stats",
            BlockKind::Newsletter => "newsletter",
            BlockKind::Text => "text",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
            BlockKind::Navigation => "navigation",
            BlockKind::Columns => "columns",
            BlockKind::Container => "container",
            BlockKind::Form => "form",
            BlockKind::Divider => "divider",
            BlockKind::Spacer => "spacer",
        }
    }
}

impl FromStr for BlockKind {
    type Err = EditError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        BlockKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| EditError::invalid(format!("unknown block type '{tag}'")))
    }
}

/// Page region a top-level block lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Header,
    #[default]
    Content,
    Sidebar,
    Footer,
}

impl FromStr for Zone {
    type Err = EditError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "header" => Ok(Zone::Header),
            "content" => Ok(Zone::Content),
            "sidebar" => Ok(Zone::Sidebar),
            "footer" => Ok(Zone::Footer),
            other => Err(EditError::invalid(format!("unknown zone '{other}'"))),
        }
    }
}

/// One node of the content tree.
///
/// `order` is the 0-based index of the block inside its
/// `(parent_id, zone)` group. Children share their parent's zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub zone: Zone,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub order: usize,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind, zone: Zone) -> Self {
        Self {
            id: id.into(),
            kind,
            props: Map::new(),
            zone,
            parent_id: None,
            order: 0,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Key of the sibling group this block is ordered within.
    pub fn group(&self) -> GroupKey {
        GroupKey {
            parent_id: self.parent_id.clone(),
            zone: self.zone,
        }
    }
}

/// Identifies a sibling group: blocks sharing a parent (or none) and zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub parent_id: Option<String>,
    pub zone: Zone,
}

impl GroupKey {
    pub fn top_level(zone: Zone) -> Self {
        Self { parent_id: None, zone }
    }
}
