//! # canvas-collab - Real-time collaboration engine for a shared drawing canvas
//!
//! Keeps independent peers' copies of a scene converging under concurrent
//! edits, flaky connectivity and an untrusted relay. Every payload is
//! encrypted with a room key that only link holders know.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ClientFrame (ciphertext)  ┌──────────────┐
//! │ Collab       │ ◄────────────────────────► │ RelayServer  │
//! │ (per peer)   │  RelayFrame                │ (untrusted)  │
//! └──────┬───────┘                            └──────┬───────┘
//!        │                                           │
//!        ▼                                           ▼
//! ┌──────────────┐  reconcile()               ┌──────────────┐
//! │ CanvasHost   │ ◄── BroadcastScheduler     │ RoomManager  │
//! │ (scene)      │     PresenceEngine         │ BroadcastGrp │
//! └──────┬───────┘     FileSync               └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ SceneStore   │  encrypted snapshots + files
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`element`]: Scene elements, versions and tombstones
//! - [`reconcile`]: Last-writer-wins merge of remote and local elements
//! - [`version`]: Scene version and the syncable subset
//! - [`scheduler`]: When and what scene data goes out
//! - [`protocol`]: Encrypted message kinds and relay frames (bincode)
//! - [`crypto`]: Room keys (AES-128-GCM)
//! - [`room`]: Share links and the room state machine
//! - [`transport`] / [`client`]: Connection boundary and WebSocket carrier
//! - [`files`]: Binary asset fetch/upload with dedup
//! - [`presence`]: Collaborators, cursors and idle detection
//! - [`persist`] / [`storage`]: Durable encrypted snapshots
//! - [`host`]: What a session needs from the canvas
//! - [`session`]: The host-facing session API
//! - [`broadcast`] / [`relay`]: The relay server

pub mod element;
pub mod reconcile;
pub mod version;
pub mod scheduler;
pub mod protocol;
pub mod crypto;
pub mod room;
pub mod transport;
pub mod client;
pub mod files;
pub mod presence;
pub mod persist;
pub mod storage;
pub mod host;
pub mod session;
pub mod error;
pub mod broadcast;
pub mod relay;

// Re-exports for convenience
pub use element::{Element, ElementId, ElementKind, FileId, FileStatus, Point};
pub use reconcile::reconcile;
pub use version::{scene_version, syncable_elements, VersionTracker};
pub use scheduler::BroadcastScheduler;
pub use protocol::{
    ClientFrame, MessageKind, PointerButton, PointerPayload, PresencePayload, ProtocolError,
    RelayFrame, SocketId, WireMessage,
};
pub use crypto::{CryptoError, EncryptedPayload, RoomKey};
pub use room::{InitialScene, Room, RoomLink};
pub use transport::{TransportError, TransportEvent, TransportHandle, TransportRemote};
pub use files::{BinaryFile, FetchOutcome, FileSync, UploadOutcome};
pub use presence::{Collaborator, CollaboratorMap, CursorColor, PresenceEngine, UserIdleState};
pub use persist::ScenePersister;
pub use storage::{MemoryStore, RocksSceneStore, SceneStore, StoreConfig, StoreError, StoredScene};
pub use host::{CanvasHost, MemoryCanvas};
pub use session::{Collab, CollabConfig, CollabState, Diagnostics, OpenedRoom};
pub use error::CollabError;
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use relay::{RelayConfig, RelayServer, RelayStats};
