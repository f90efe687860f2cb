//! Rooms and share links.
//!
//! ```text
//! closed ──open──► open(uninitialized) ──SCENE_INIT | FirstInRoom | timeout──► open(initialized)
//!    ▲                     │                                                       │
//!    └─────────────────────┴────────────────────── close ──────────────────────────┘
//! ```
//!
//! A room owns its transport and key. Dropping it tears both down.

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::crypto::{generate_room_id, EncryptedPayload, RoomKey};
use crate::element::Element;
use crate::error::CollabError;
use crate::protocol::{ClientFrame, SocketId, WireMessage};
use crate::transport::TransportHandle;

/// Resolution of a room's initial-scene request. `None` means "no scene".
pub type InitialScene = Option<Vec<Element>>;

const LINK_FRAGMENT_PREFIX: &str = "#room=";

// ───────────────────────────────────────────────────────────────────
// Share link
// ───────────────────────────────────────────────────────────────────

/// Room id plus key, as carried in a share link fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub room_id: String,
    pub room_key: RoomKey,
}

impl RoomLink {
    /// Fresh id and key for a new room.
    pub fn generate() -> Self {
        Self {
            room_id: generate_room_id(),
            room_key: RoomKey::generate(),
        }
    }

    /// Parse `<anything>#room=<room_id>,<room_key>`.
    pub fn parse(link: &str) -> Result<Self, CollabError> {
        let invalid = || CollabError::InvalidRoomLink(link.to_string());

        let start = link.find(LINK_FRAGMENT_PREFIX).ok_or_else(invalid)?;
        let fragment = &link[start + LINK_FRAGMENT_PREFIX.len()..];
        let (room_id, key) = fragment.split_once(',').ok_or_else(invalid)?;

        if room_id.is_empty() || !room_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        let room_key = RoomKey::from_link_str(key).map_err(|_| invalid())?;

        Ok(Self {
            room_id: room_id.to_string(),
            room_key,
        })
    }

    /// `<base>#room=<room_id>,<room_key>`; the key stays in the fragment.
    pub fn to_url(&self, base: &str) -> String {
        let base = base.split('#').next().unwrap_or(base);
        format!(
            "{base}{LINK_FRAGMENT_PREFIX}{},{}",
            self.room_id,
            self.room_key.to_link_str()
        )
    }
}

// ───────────────────────────────────────────────────────────────────
// Open room
// ───────────────────────────────────────────────────────────────────

/// One open room: connection, key material and initialization state.
#[derive(Debug)]
pub struct Room {
    pub room_id: String,
    room_key: RoomKey,
    transport: TransportHandle,
    socket_id: Option<SocketId>,
    initialized: bool,
    init_deadline: Option<Instant>,
    initial_scene: Option<oneshot::Sender<InitialScene>>,
}

impl Room {
    /// Open a room over `transport`; returns the room and the receiver of its
    /// initial scene.
    pub fn open(
        link: &RoomLink,
        transport: TransportHandle,
        init_deadline: Instant,
    ) -> (Self, oneshot::Receiver<InitialScene>) {
        let (tx, rx) = oneshot::channel();
        let room = Self {
            room_id: link.room_id.clone(),
            room_key: link.room_key.clone(),
            transport,
            socket_id: None,
            initialized: false,
            init_deadline: Some(init_deadline),
            initial_scene: Some(tx),
        };
        (room, rx)
    }

    pub fn key(&self) -> &RoomKey {
        &self.room_key
    }

    pub fn link(&self) -> RoomLink {
        RoomLink {
            room_id: self.room_id.clone(),
            room_key: self.room_key.clone(),
        }
    }

    pub fn transport_mut(&mut self) -> &mut TransportHandle {
        &mut self.transport
    }

    pub fn socket_id(&self) -> Option<SocketId> {
        self.socket_id
    }

    pub fn set_socket_id(&mut self, socket_id: SocketId) {
        self.socket_id = Some(socket_id);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Ask the relay to put us in this room.
    pub fn join(&self) -> Result<(), CollabError> {
        self.transport.send(ClientFrame::JoinRoom {
            room_id: self.room_id.clone(),
        })?;
        Ok(())
    }

    /// Encrypt and send a message to every other member.
    pub fn broadcast(&self, message: &WireMessage, volatile: bool) -> Result<(), CollabError> {
        let plaintext = message.encode()?;
        let payload = self.room_key.encrypt(&plaintext)?;
        self.transport.send(ClientFrame::Broadcast {
            room_id: self.room_id.clone(),
            volatile,
            payload,
        })?;
        Ok(())
    }

    /// Decrypt and parse an inbound payload.
    pub fn open_payload(&self, payload: &EncryptedPayload) -> Result<WireMessage, CollabError> {
        let plaintext = self.room_key.decrypt(payload)?;
        Ok(WireMessage::decode(&plaintext)?)
    }

    /// Resolve the initial-scene request. Later calls are no-ops.
    pub fn resolve_initial_scene(&mut self, scene: InitialScene) -> bool {
        match self.initial_scene.take() {
            Some(tx) => {
                // The receiver may be gone; nobody is waiting then
                let _ = tx.send(scene);
                true
            }
            None => false,
        }
    }

    pub fn has_pending_initial_scene(&self) -> bool {
        self.initial_scene.is_some()
    }

    /// First authoritative scene applied (or given up on). Returns whether
    /// this call changed anything.
    pub fn mark_initialized(&mut self) -> bool {
        self.init_deadline = None;
        if self.initialized {
            return false;
        }
        self.initialized = true;
        log::info!("Room {} initialized", self.room_id);
        true
    }

    pub fn init_deadline(&self) -> Option<Instant> {
        self.init_deadline
    }

    /// Tear down: release a waiting caller with "no scene" and stop reading.
    pub fn close(mut self) {
        self.resolve_initial_scene(None);
        self.transport.close();
        log::info!("Room {} closed", self.room_id);
    }
}
