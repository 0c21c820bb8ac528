//! Payloads produced by an external theme generator.
//!
//! A generated theme is never applied wholesale: it is broken down into one
//! settings merge followed by one `add` per block, so it flows through the
//! same validation, history and broadcast path as a human edit.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::block::Zone;
use crate::ops::BlockOperation;

/// A full or partial theme suggested by a generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTheme {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default)]
    pub blocks: Vec<GeneratedBlock>,
}

/// One suggested block. The type tag is kept as text so an unknown tag is
/// rejected by the processor rather than at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub zone: Zone,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl GeneratedTheme {
    /// Settings patch (if any) and the `add` operations, in apply order.
    pub fn into_operations(self) -> (Option<Value>, Vec<BlockOperation>) {
        let ops = self
            .blocks
            .into_iter()
            .map(|block| {
                BlockOperation::add(json!({
                    "type": block.kind,
                    "zone": block.zone,
                    "props": block.props,
                }))
            })
            .collect();
        (self.settings, ops)
    }
}
