//! Presence: who is in the room, where their cursor is, whether they are
//! still at the keyboard.
//!
//! ## Architecture
//!
//! ```text
//! Local pointer move                      Remote POINTER / PRESENCE
//!       │                                          │
//!       ├──► CollaboratorMap::take_pointer_slot()  ▼
//!       │      (rate-limited: 30fps)         CollaboratorMap::apply_*()
//!       ▼
//! PresenceEngine::on_pointer_move()
//!       │
//!       ▼
//!   ACTIVE ──(no motion for idle_threshold)──► IDLE
//!     ▲  │                                      │
//!     │  └──────(hidden)──────► AWAY ◄──────────┘
//!     └──────────(visible / motion)──────┘
//! ```
//!
//! Presence is not part of the scene and is never version-diffed; every
//! state transition goes out as one `PRESENCE` message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::element::{ElementId, Point};
use crate::protocol::{PointerButton, PointerPayload, PresencePayload, SocketId};

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// Idle state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserIdleState {
    #[default]
    Active,
    Idle,
    Away,
}

/// RGBA color for cursor/selection rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Generate a stable, visually distinct color from a connection id.
    ///
    /// Uses HSL color space with high saturation for vivid cursors.
    pub fn from_uuid(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let saturation = 0.7;
        let lightness = 0.6;

        let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
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

// ───────────────────────────────────────────────────────────────────
// Remote collaborators
// ───────────────────────────────────────────────────────────────────

/// What we know about one remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Collaborator {
    pub socket_id: SocketId,
    pub pointer: Option<Point>,
    pub button: PointerButton,
    pub selected_element_ids: Vec<ElementId>,
    pub username: Option<String>,
    pub idle_state: Option<UserIdleState>,
    pub color: CursorColor,
}

impl Collaborator {
    pub fn new(socket_id: SocketId) -> Self {
        Self {
            socket_id,
            pointer: None,
            button: PointerButton::Up,
            selected_element_ids: Vec::new(),
            username: None,
            idle_state: None,
            color: CursorColor::from_uuid(socket_id),
        }
    }
}

/// Remote peers of the current room plus local pointer throttling.
#[derive(Debug)]
pub struct CollaboratorMap {
    local_socket_id: Option<SocketId>,
    peers: HashMap<SocketId, Collaborator>,
    /// Minimum interval between outgoing pointer messages (33ms = 30fps).
    pointer_interval: Duration,
    last_pointer_sent: Option<Instant>,
}

impl CollaboratorMap {
    pub fn new(pointer_interval: Duration) -> Self {
        Self {
            local_socket_id: None,
            peers: HashMap::new(),
            pointer_interval,
            last_pointer_sent: None,
        }
    }

    /// Our own connection id; messages from it are ignored.
    pub fn set_local_socket_id(&mut self, socket_id: SocketId) {
        self.local_socket_id = Some(socket_id);
        self.peers.remove(&socket_id);
    }

    pub fn local_socket_id(&self) -> Option<SocketId> {
        self.local_socket_id
    }

    /// Replace the membership with `socket_ids`.
    ///
    /// Entries for ids still present keep their state; everyone else is gone.
    pub fn set_peers(&mut self, socket_ids: &[SocketId]) {
        let mut next = HashMap::with_capacity(socket_ids.len());
        for id in socket_ids {
            if Some(*id) == self.local_socket_id {
                continue;
            }
            let entry = self.peers.remove(id).unwrap_or_else(|| Collaborator::new(*id));
            next.insert(*id, entry);
        }
        self.peers = next;
    }

    /// Replace pointer, button, selection and name of the sender.
    pub fn apply_pointer(&mut self, payload: &PointerPayload) {
        if Some(payload.socket_id) == self.local_socket_id {
            return;
        }
        let peer = self.entry(payload.socket_id);
        peer.pointer = Some(payload.pointer);
        peer.button = payload.button;
        peer.selected_element_ids = payload.selected_element_ids.clone();
        peer.username = payload.username.clone();
    }

    /// Update idle state and name of the sender.
    pub fn apply_presence(&mut self, payload: &PresencePayload) {
        if Some(payload.socket_id) == self.local_socket_id {
            return;
        }
        let peer = self.entry(payload.socket_id);
        peer.idle_state = Some(payload.user_state);
        peer.username = payload.username.clone();
    }

    /// Claim the next outgoing pointer slot. `false` while throttled.
    pub fn take_pointer_slot(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_pointer_sent {
            if now.duration_since(last) < self.pointer_interval {
                return false;
            }
        }
        self.last_pointer_sent = Some(now);
        true
    }

    pub fn get(&self, socket_id: &SocketId) -> Option<&Collaborator> {
        self.peers.get(socket_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collaborator> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget everything, including our own id.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.local_socket_id = None;
        self.last_pointer_sent = None;
    }

    fn entry(&mut self, socket_id: SocketId) -> &mut Collaborator {
        self.peers
            .entry(socket_id)
            .or_insert_with(|| Collaborator::new(socket_id))
    }
}

// ───────────────────────────────────────────────────────────────────
// Local idle detection
// ───────────────────────────────────────────────────────────────────

/// Local idle state machine driven by pointer motion, visibility and time.
///
/// Every method that can change state returns the state to broadcast, if any.
#[derive(Debug)]
pub struct PresenceEngine {
    state: UserIdleState,
    visible: bool,
    idle_threshold: Duration,
    active_interval: Duration,
    idle_deadline: Option<Instant>,
    active_deadline: Option<Instant>,
}

impl PresenceEngine {
    pub fn new(idle_threshold: Duration, active_interval: Duration) -> Self {
        Self {
            state: UserIdleState::Active,
            visible: true,
            idle_threshold,
            active_interval,
            idle_deadline: None,
            active_deadline: None,
        }
    }

    pub fn state(&self) -> UserIdleState {
        self.state
    }

    /// Arm the timers for a freshly opened room.
    pub fn start(&mut self, now: Instant) {
        self.state = if self.visible { UserIdleState::Active } else { UserIdleState::Away };
        if self.visible {
            self.arm(now);
        }
    }

    /// Pointer moved. Ignored while hidden.
    pub fn on_pointer_move(&mut self, now: Instant) -> Option<UserIdleState> {
        if !self.visible {
            return None;
        }
        self.arm(now);
        self.transition(UserIdleState::Active)
    }

    /// The host window was hidden or shown again.
    pub fn on_visibility_change(&mut self, visible: bool, now: Instant) -> Option<UserIdleState> {
        self.visible = visible;
        if visible {
            self.arm(now);
            self.transition(UserIdleState::Active)
        } else {
            self.idle_deadline = None;
            self.active_deadline = None;
            self.transition(UserIdleState::Away)
        }
    }

    /// Fire whichever timer is due.
    pub fn poll(&mut self, now: Instant) -> Option<UserIdleState> {
        if self.idle_deadline.is_some_and(|d| d <= now) {
            self.idle_deadline = None;
            self.active_deadline = None;
            return self.transition(UserIdleState::Idle);
        }
        if self.active_deadline.is_some_and(|d| d <= now) {
            self.active_deadline = Some(now + self.active_interval);
            // Heartbeat, not a transition
            return Some(UserIdleState::Active);
        }
        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.idle_deadline, self.active_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Cancel all timers (room closed). Visibility is kept.
    pub fn stop(&mut self) {
        self.idle_deadline = None;
        self.active_deadline = None;
        self.state = UserIdleState::Active;
    }

    fn arm(&mut self, now: Instant) {
        self.idle_deadline = Some(now + self.idle_threshold);
        if self.active_deadline.is_none() {
            self.active_deadline = Some(now + self.active_interval);
        }
    }

    fn transition(&mut self, next: UserIdleState) -> Option<UserIdleState> {
        if self.state == next {
            return None;
        }
        log::debug!("Idle state {:?} -> {next:?}", self.state);
        self.state = next;
        Some(next)
    }
}

// ───────────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────────
