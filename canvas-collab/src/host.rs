//! The canvas host as seen by a collaboration session.
//!
//! The host owns the element store, the asset cache and the undo history.
//! A session only reads them and proposes replacements through this trait,
//! never holding references into host memory between calls.

use std::collections::{HashMap, HashSet};

use crate::element::{Element, ElementId, FileId};
use crate::error::CollabError;
use crate::files::BinaryFile;

/// Narrow API a session consumes from the canvas.
pub trait CanvasHost {
    /// Current scene in z-order, tombstones included.
    fn scene_elements_including_deleted(&self) -> Vec<Element>;

    /// Replace the whole scene.
    fn replace_elements(&mut self, elements: Vec<Element>);

    /// Ids under exclusive local interaction (editing, resizing, dragging).
    fn protected_element_ids(&self) -> HashSet<ElementId>;

    /// Drop every edit-in-progress marker.
    fn clear_edit_markers(&mut self);

    fn files(&self) -> HashMap<FileId, BinaryFile>;

    /// Merge files into the asset cache.
    fn add_files(&mut self, files: Vec<BinaryFile>);

    fn clear_history(&mut self);

    /// Write-only error sink.
    fn report_error(&mut self, _error: &CollabError) {}
}

/// In-memory canvas: the reference host used by tests and headless peers.
#[derive(Debug, Default)]
pub struct MemoryCanvas {
    elements: Vec<Element>,
    files: HashMap<FileId, BinaryFile>,
    editing: HashSet<ElementId>,
    history_depth: usize,
    errors: Vec<String>,
}

impl MemoryCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(elements: Vec<Element>) -> Self {
        Self {
            elements,
            ..Self::default()
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Append a new element as a local edit.
    pub fn insert(&mut self, element: Element) {
        self.elements.push(element);
        self.history_depth += 1;
    }

    /// Apply a local edit to one element (version bump included).
    pub fn edit(&mut self, id: &str, edit: impl FnOnce(&mut Element)) -> bool {
        match self.elements.iter_mut().find(|e| e.id == id) {
            Some(element) => {
                element.mutate(edit);
                self.history_depth += 1;
                true
            }
            None => false,
        }
    }

    /// Mark an element as being edited, resized or dragged.
    pub fn begin_edit(&mut self, id: impl Into<ElementId>) {
        self.editing.insert(id.into());
    }

    pub fn end_edit(&mut self, id: &str) {
        self.editing.remove(id);
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Errors reported through [`CanvasHost::report_error`].
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl CanvasHost for MemoryCanvas {
    fn scene_elements_including_deleted(&self) -> Vec<Element> {
        self.elements.clone()
    }

    fn replace_elements(&mut self, elements: Vec<Element>) {
        self.elements = elements;
    }

    fn protected_element_ids(&self) -> HashSet<ElementId> {
        self.editing.clone()
    }

    fn clear_edit_markers(&mut self) {
        self.editing.clear();
    }

    fn files(&self) -> HashMap<FileId, BinaryFile> {
        self.files.clone()
    }

    fn add_files(&mut self, files: Vec<BinaryFile>) {
        for file in files {
            self.files.insert(file.id.clone(), file);
        }
    }

    fn clear_history(&mut self) {
        self.history_depth = 0;
    }

    fn report_error(&mut self, error: &CollabError) {
        self.errors.push(error.to_string());
    }
}
