//! Decides when and what scene data goes out.
//!
//! ```text
//! local mutation ──► version > last, or an element ──no──► nothing
//!                    past its known version?
//!                          │yes
//!                          ▼
//!              incremental SCENE_UPDATE (changed elements only)
//!                          │
//!                          ▼
//!              (re)arm full-resync deadline ──► full SCENE_UPDATE
//! ```
//!
//! Received scenes are recorded too, so a merge is never echoed back.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::element::{Element, ElementId};
use crate::version::{scene_version, syncable_elements, VersionTracker};

/// Broadcast decision state for one room.
#[derive(Debug)]
pub struct BroadcastScheduler {
    tracker: VersionTracker,
    /// Highest version of each element already sent or received.
    known_versions: HashMap<ElementId, u32>,
    full_sync_interval: Duration,
    full_sync_deadline: Option<Instant>,
}

impl BroadcastScheduler {
    pub fn new(full_sync_interval: Duration) -> Self {
        Self {
            tracker: VersionTracker::new(),
            known_versions: HashMap::new(),
            full_sync_interval,
            full_sync_deadline: None,
        }
    }

    /// Handle a local mutation.
    ///
    /// Returns the incremental payload to send, or `None` when the scene holds
    /// nothing newer than what was last sent or received. A send restarts the
    /// full-resync deadline.
    ///
    /// The scene version can drop when an element shrinks out of the syncable
    /// subset, so an element edited past its known version is sent even when
    /// the summed version does not exceed the tracker.
    pub fn on_local_change(&mut self, elements: &[Element], now: Instant) -> Option<Vec<Element>> {
        let version = scene_version(elements);
        let newer = self.tracker.is_newer(version);
        let update = self.collect(elements, false);
        if !newer && update.is_empty() {
            log::trace!("Scene version {version} already synced, skipping broadcast");
            return None;
        }

        self.tracker.record(version);
        self.arm_full_sync(now);

        if update.is_empty() {
            log::debug!("Scene version {version} has no syncable changes");
            return None;
        }
        Some(update)
    }

    /// Full syncable scene, for a resync tick or a newcomer's `SCENE_INIT`.
    ///
    /// Re-levels the tracker to the scene's version.
    pub fn full_scene(&mut self, elements: &[Element]) -> Vec<Element> {
        let payload = self.collect(elements, true);
        self.tracker.record(scene_version(elements));
        payload
    }

    /// Take the full-resync tick if its deadline has passed.
    pub fn take_due_full_sync(&mut self, now: Instant) -> bool {
        match self.full_sync_deadline {
            Some(deadline) if deadline <= now => {
                self.full_sync_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Record a reconciled remote scene as already synchronized.
    pub fn record_received(&mut self, reconciled: &[Element]) {
        self.tracker.record(scene_version(reconciled));
        for element in reconciled {
            self.note_version(element);
        }
    }

    /// Restart the full-resync deadline (at most one pending).
    pub fn arm_full_sync(&mut self, now: Instant) {
        self.full_sync_deadline = Some(now + self.full_sync_interval);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.full_sync_deadline
    }

    /// Last scene version sent or received.
    pub fn last_version(&self) -> u64 {
        self.tracker.last()
    }

    /// Drop all state; the next room starts from scratch.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.known_versions.clear();
        self.full_sync_deadline = None;
    }

    fn collect(&mut self, elements: &[Element], sync_all: bool) -> Vec<Element> {
        let payload: Vec<Element> = syncable_elements(elements)
            .into_iter()
            .filter(|e| {
                sync_all
                    || self
                        .known_versions
                        .get(&e.id)
                        .map_or(true, |&known| e.version > known)
            })
            .collect();
        for element in &payload {
            self.note_version(element);
        }
        payload
    }

    fn note_version(&mut self, element: &Element) {
        let known = self.known_versions.entry(element.id.clone()).or_insert(0);
        *known = (*known).max(element.version);
    }
}
