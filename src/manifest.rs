//! The `images.json` manifest written next to the archived document.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Run-scoped identifier for one discovered image (`archive-id-<n>`).
///
/// Ids restart at zero for every capture, so two runs over the same page
/// produce identical manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(usize);

impl CorrelationId {
    pub fn new(index: usize) -> Self {
        CorrelationId(index)
    }

    /// Zero-based discovery index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archive-id-{}", self.0)
    }
}

/// One persisted manifest record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "originalSrc")]
    pub original_src: String,
    pub name: String,
}

/// Serialize entries as a pretty-printed JSON array (2-space indent).
pub fn to_json(entries: &[ManifestEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(entries)?)
}
