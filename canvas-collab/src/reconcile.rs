//! Merge of a remotely received element sequence into local state.
//!
//! Last-writer-wins per element identity:
//!
//! ```text
//! remote:  [a3, b1, c2]            local: [b2, d1, a3']
//!            │   │   │                      │   │
//!            ▼   ▼   ▼                      │   │
//! output:  [a?, b2, c2] ++ leftovers ───────┘   └─► [d1]
//! ```
//!
//! The remote pass decides each id in remote order; ids never seen remotely
//! (or protected by an in-progress local interaction) follow in local order.

use std::collections::{HashMap, HashSet};

use crate::element::{Element, ElementId};

/// Merge `remote` into `local`.
///
/// `protected` holds ids under exclusive local interaction (editing, resizing,
/// dragging). Those are never replaced by a remote version; the local copy is
/// emitted in the trailing local pass.
pub fn reconcile(
    remote: &[Element],
    local: &[Element],
    protected: &HashSet<ElementId>,
) -> Vec<Element> {
    let mut local_index: HashMap<&str, &Element> =
        local.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut emitted: HashSet<&str> = HashSet::with_capacity(remote.len());
    let mut merged = Vec::with_capacity(remote.len().max(local.len()));

    for remote_el in remote {
        let id = remote_el.id.as_str();
        if protected.contains(id) || !emitted.insert(id) {
            continue;
        }

        let winner = match local_index.remove(id) {
            Some(local_el) => pick_winner(local_el, remote_el),
            None => remote_el,
        };
        merged.push(winner.clone());
    }

    for local_el in local {
        if local_index.remove(local_el.id.as_str()).is_some() {
            merged.push(local_el.clone());
        }
    }

    merged
}

/// Decide between two versions of the same element.
///
/// Higher version wins; on equal versions the lower nonce wins, which every
/// peer computes identically without coordination.
pub fn pick_winner<'a>(local: &'a Element, remote: &'a Element) -> &'a Element {
    if local.version > remote.version {
        return local;
    }
    if local.version == remote.version && local.version_nonce < remote.version_nonce {
        return local;
    }
    remote
}
