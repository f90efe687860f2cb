//! Scene elements as seen by the collaboration layer.
//!
//! The host canvas owns the authoritative element store; this module only
//! describes the shape of an element well enough to version, reconcile,
//! filter and ship it. Identity is `id`, causality is `version`, and
//! `version_nonce` breaks ties between concurrent edits that landed on the
//! same version number.

use serde::{Deserialize, Serialize};

/// Stable, globally unique element identity (never reused).
pub type ElementId = String;

/// Identity of a binary asset referenced by image elements.
pub type FileId = String;

/// 2D point in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Whether the binary behind an image element has been durably persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Only present in the local asset cache.
    Pending,
    /// Known to exist in the room's file namespace.
    Saved,
}

/// Kind-specific element payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Rectangle,
    Ellipse,
    Diamond,
    Text { text: String },
    /// Lines, arrows and freehand strokes.
    Linear { points: Vec<Point> },
    Image { file_id: FileId, status: FileStatus },
}

impl ElementKind {
    /// Same variant with every content field emptied.
    fn stripped(&self) -> ElementKind {
        match self {
            ElementKind::Rectangle => ElementKind::Rectangle,
            ElementKind::Ellipse => ElementKind::Ellipse,
            ElementKind::Diamond => ElementKind::Diamond,
            ElementKind::Text { .. } => ElementKind::Text { text: String::new() },
            ElementKind::Linear { .. } => ElementKind::Linear { points: Vec::new() },
            // The file reference is kept so peers can still match the tombstone
            // against their asset cache.
            ElementKind::Image { file_id, status } => ElementKind::Image {
                file_id: file_id.clone(),
                status: *status,
            },
        }
    }
}

/// One drawable unit of the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    /// Monotonically increasing per-edit counter.
    pub version: u32,
    /// Random tiebreaker regenerated on every mutation.
    pub version_nonce: u32,
    /// Tombstone flag; deleted elements stay in the scene so deletions propagate.
    pub is_deleted: bool,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub kind: ElementKind,
}

impl Element {
    /// Create a fresh element at version 1 with a random nonce.
    pub fn new(id: impl Into<ElementId>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            version: 1,
            version_nonce: rand::random(),
            is_deleted: false,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            kind,
        }
    }

    /// Builder-style geometry setter.
    pub fn with_bounds(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    /// Apply an edit and record it as a new version.
    pub fn mutate(&mut self, edit: impl FnOnce(&mut Element)) {
        edit(self);
        self.bump_version();
    }

    /// Record an edit: next version, new nonce.
    pub fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
        self.version_nonce = rand::random();
    }

    /// Mark deleted as a new version.
    pub fn delete(&mut self) {
        self.mutate(|e| e.is_deleted = true);
    }

    /// File referenced by an image element.
    pub fn file_id(&self) -> Option<&FileId> {
        match &self.kind {
            ElementKind::Image { file_id, .. } => Some(file_id),
            _ => None,
        }
    }

    /// Upload status of an image element.
    pub fn file_status(&self) -> Option<FileStatus> {
        match &self.kind {
            ElementKind::Image { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Set the upload status of an image element. No-op for other kinds.
    pub fn set_file_status(&mut self, new_status: FileStatus) {
        if let ElementKind::Image { status, .. } = &mut self.kind {
            *status = new_status;
        }
    }

    /// Elements with (near) zero extent that nobody can see or hit.
    pub fn is_invisibly_small(&self) -> bool {
        match &self.kind {
            ElementKind::Linear { points } => points.len() < 2,
            ElementKind::Text { text } => text.trim().is_empty(),
            _ => self.width == 0.0 && self.height == 0.0,
        }
    }

    /// Whether the element belongs in outgoing traffic and stored snapshots.
    ///
    /// Deleted elements always do (as tombstones); live negligible ones never.
    pub fn is_syncable(&self) -> bool {
        self.is_deleted || !self.is_invisibly_small()
    }

    /// Copy carrying only identity, version state and the deletion flag.
    pub fn tombstone(&self) -> Element {
        Element {
            id: self.id.clone(),
            version: self.version,
            version_nonce: self.version_nonce,
            is_deleted: true,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            kind: self.kind.stripped(),
        }
    }
}
