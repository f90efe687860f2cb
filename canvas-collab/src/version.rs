//! Scene versioning and the syncable subset.
//!
//! The scene version is a cheap aggregate used only to answer "is there
//! anything new since we last sent or received?". It is not a vector clock.

use crate::element::Element;

/// Elements eligible for transmission or persistence.
///
/// Live negligible elements are dropped; deleted elements are reduced to
/// tombstones so the deletion propagates without the old content.
pub fn syncable_elements(elements: &[Element]) -> Vec<Element> {
    elements
        .iter()
        .filter(|e| e.is_syncable())
        .map(|e| if e.is_deleted { e.tombstone() } else { e.clone() })
        .collect()
}

/// Sum of element versions over the syncable subset.
pub fn scene_version(elements: &[Element]) -> u64 {
    elements
        .iter()
        .filter(|e| e.is_syncable())
        .map(|e| u64::from(e.version))
        .sum()
}

/// Last scene version broadcast or received in the current session.
///
/// Only ever moves upward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionTracker {
    last: u64,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded version.
    pub fn last(&self) -> u64 {
        self.last
    }

    /// A local scene at `version` has something peers have not seen.
    pub fn is_newer(&self, version: u64) -> bool {
        version > self.last
    }

    /// Record a version we just sent or received.
    pub fn record(&mut self, version: u64) {
        self.last = self.last.max(version);
    }

    /// Forget everything (room closed).
    pub fn reset(&mut self) {
        self.last = 0;
    }
}
