//! Collaboration session: the host-facing API and the event loop glue.
//!
//! ## Control flow
//!
//! ```text
//! host edit ──► send_local_mutation ──► BroadcastScheduler ──► Room::broadcast (SCENE_UPDATE)
//!                        │                      │
//!                        ▼                      └──► full-resync deadline ──► full SCENE_UPDATE
//!                 FileSync::save_files                                         + snapshot save
//!
//! fixed snapshot cadence ──► ScenePersister::save (never pushed back by sends)
//!
//! TransportEvent ──► handle_transport_event
//!     InitRoom        → JoinRoom
//!     FirstInRoom     → initialized, initial scene = None
//!     NewUser         → SCENE_INIT (full scene)
//!     RoomUserChange  → CollaboratorMap::set_peers
//!     ClientBroadcast → decrypt ─► SCENE_INIT / SCENE_UPDATE ─► reconcile ─► host
//!                                  POINTER / PRESENCE        ─► CollaboratorMap
//! ```
//!
//! Everything runs on the caller's task. [`Collab::step`] waits for the next
//! transport event or timer deadline and handles it; a host driving its own
//! loop can call [`Collab::handle_transport_event`] and
//! [`Collab::handle_wakeup`] directly instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::element::{Element, ElementId, FileStatus, Point};
use crate::error::CollabError;
use crate::files::FileSync;
use crate::host::CanvasHost;
use crate::persist::{load_scene, ScenePersister};
use crate::presence::{CollaboratorMap, PresenceEngine, UserIdleState};
use crate::protocol::{PointerButton, PointerPayload, PresencePayload, RelayFrame, WireMessage};
use crate::reconcile::reconcile;
use crate::room::{InitialScene, Room, RoomLink};
use crate::scheduler::BroadcastScheduler;
use crate::storage::SceneStore;
use crate::transport::{TransportEvent, TransportHandle};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Give up waiting for an authoritative scene after this long
    pub init_timeout: Duration,
    /// Delay of the full-scene resync after the last incremental send
    pub full_sync_interval: Duration,
    /// Fixed cadence of durable snapshot saves while a room is open
    pub snapshot_interval: Duration,
    /// Minimum interval between outgoing pointer messages
    pub pointer_sync_interval: Duration,
    /// No pointer motion for this long means idle
    pub idle_threshold: Duration,
    /// "Still active" heartbeat interval
    pub active_heartbeat_interval: Duration,
    /// Upload batch cap in bytes
    pub max_file_batch_bytes: usize,
    /// Root of per-room file namespaces in the store
    pub files_prefix: String,
    pub username: Option<String>,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(5),
            full_sync_interval: Duration::from_secs(20),
            snapshot_interval: Duration::from_secs(20),
            pointer_sync_interval: Duration::from_millis(33),
            idle_threshold: Duration::from_secs(60),
            active_heartbeat_interval: Duration::from_secs(3),
            max_file_batch_bytes: 4 * 1024 * 1024,
            files_prefix: "files/rooms".into(),
            username: None,
        }
    }
}

impl CollabConfig {
    /// Short timers and a small upload cap for tests.
    pub fn for_testing() -> Self {
        Self {
            init_timeout: Duration::from_millis(500),
            full_sync_interval: Duration::from_secs(2),
            snapshot_interval: Duration::from_secs(2),
            pointer_sync_interval: Duration::from_millis(10),
            idle_threshold: Duration::from_secs(6),
            active_heartbeat_interval: Duration::from_secs(1),
            max_file_batch_bytes: 64 * 1024,
            files_prefix: "files/rooms".into(),
            username: Some("tester".into()),
        }
    }
}

/// What the host shows about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollabState {
    pub is_collaborating: bool,
    pub username: Option<String>,
    pub idle_state: UserIdleState,
}

/// Point-in-time view of session internals, for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub room_id: Option<String>,
    pub initialized: bool,
    pub last_version: u64,
    pub collaborator_count: usize,
    pub handled_files: usize,
}

/// A freshly opened room.
#[derive(Debug)]
pub struct OpenedRoom {
    /// Link to share; carries the key.
    pub link: RoomLink,
    /// Resolves once with the first authoritative scene, or `None`.
    pub initial_scene: oneshot::Receiver<InitialScene>,
}

enum Wakeup {
    Event(Option<TransportEvent>),
    Timer,
}

/// One collaboration session bound to a canvas host.
pub struct Collab<H: CanvasHost> {
    config: CollabConfig,
    host: H,
    store: Arc<dyn SceneStore>,
    room: Option<Room>,
    /// Carrier gone; only timers remain until the room is closed.
    disconnected: bool,
    scheduler: BroadcastScheduler,
    collaborators: CollaboratorMap,
    presence: PresenceEngine,
    files: FileSync,
    persister: ScenePersister,
    /// Next periodic snapshot save. Sends never push it back.
    snapshot_deadline: Option<Instant>,
}

impl<H: CanvasHost> Collab<H> {
    pub fn new(host: H, store: Arc<dyn SceneStore>, config: CollabConfig) -> Self {
        Self {
            scheduler: BroadcastScheduler::new(config.full_sync_interval),
            collaborators: CollaboratorMap::new(config.pointer_sync_interval),
            presence: PresenceEngine::new(config.idle_threshold, config.active_heartbeat_interval),
            files: FileSync::new(config.files_prefix.clone(), config.max_file_batch_bytes),
            persister: ScenePersister::new(),
            snapshot_deadline: None,
            room: None,
            disconnected: false,
            host,
            store,
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &CollaboratorMap {
        &self.collaborators
    }

    pub fn room_link(&self) -> Option<RoomLink> {
        self.room.as_ref().map(Room::link)
    }

    pub fn is_collaborating(&self) -> bool {
        self.room.is_some()
    }

    pub fn set_username(&mut self, username: Option<String>) {
        self.config.username = username;
    }

    pub fn state(&self) -> CollabState {
        CollabState {
            is_collaborating: self.is_collaborating(),
            username: self.config.username.clone(),
            idle_state: self.presence.state(),
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            room_id: self.room.as_ref().map(|r| r.room_id.clone()),
            initialized: self.room.as_ref().is_some_and(Room::is_initialized),
            last_version: self.scheduler.last_version(),
            collaborator_count: self.collaborators.len(),
            handled_files: self.files.handled_count(),
        }
    }

    // ─── Lifecycle ────────────────────────────────────────────────────

    /// Open a room over `transport`, closing any room already open.
    ///
    /// With a link the room is joined and hydrated from the store if
    /// possible. Without one a new room is created from the current scene.
    pub async fn open_room(
        &mut self,
        link: Option<RoomLink>,
        transport: TransportHandle,
    ) -> Result<OpenedRoom, CollabError> {
        if self.room.is_some() {
            self.close_room(true).await;
        }

        let creating = link.is_none();
        let link = link.unwrap_or_else(RoomLink::generate);
        let now = Instant::now();
        let (room, initial_scene) = Room::open(&link, transport, now + self.config.init_timeout);

        if creating {
            self.prepare_new_room_scene();
        }

        log::info!(
            "{} room {}",
            if creating { "Created" } else { "Joining" },
            link.room_id
        );
        self.room = Some(room);
        self.disconnected = false;
        self.presence.start(now);
        self.snapshot_deadline = Some(now + self.config.snapshot_interval);

        if creating {
            self.persist_snapshot().await;
            self.upload_files().await;
        } else {
            self.hydrate_from_store().await;
        }

        Ok(OpenedRoom { link, initial_scene })
    }

    /// Close the current room. No-op without one.
    ///
    /// With `keep_remote_state` the host keeps the collaborative scene;
    /// otherwise the scene, edit markers and history are reset.
    pub async fn close_room(&mut self, keep_remote_state: bool) {
        if self.room.is_none() {
            return;
        }
        self.persist_snapshot().await;

        if let Some(room) = self.room.take() {
            room.close();
        }
        self.disconnected = false;
        self.scheduler.reset();
        self.collaborators.clear();
        self.files.reset();
        self.presence.stop();
        self.persister.reset();
        self.snapshot_deadline = None;

        if !keep_remote_state {
            self.host.replace_elements(Vec::new());
            self.host.clear_edit_markers();
            self.host.clear_history();
        }
    }

    /// Scene cleanup before a room exists: deleted elements are dropped and
    /// saved images go back to pending so they are uploaded under the new key.
    fn prepare_new_room_scene(&mut self) {
        let elements = self
            .host
            .scene_elements_including_deleted()
            .into_iter()
            .filter(|e| !e.is_deleted)
            .map(|mut e| {
                if e.file_status() == Some(FileStatus::Saved) {
                    e.mutate(|e| e.set_file_status(FileStatus::Pending));
                }
                e
            })
            .collect();
        self.host.replace_elements(elements);
        self.host.clear_history();
    }

    /// Best-effort load of the stored snapshot when joining.
    async fn hydrate_from_store(&mut self) {
        let Some(link) = self.room_link() else {
            return;
        };
        match load_scene(self.store.as_ref(), &link.room_id, &link.room_key).await {
            Ok(Some(stored)) => {
                log::info!("Hydrated room {} from store ({} elements)", link.room_id, stored.len());
                let reconciled = self.apply_remote(stored).await;
                if let Some(room) = self.room.as_mut() {
                    room.resolve_initial_scene(Some(reconciled));
                }
            }
            Ok(None) => log::debug!("No stored scene for room {}", link.room_id),
            Err(e) => log::warn!("Failed to load stored scene for room {}: {e}", link.room_id),
        }
    }

    // ─── Local operations ─────────────────────────────────────────────

    /// The host scene changed locally.
    pub async fn send_local_mutation(&mut self) -> Result<(), CollabError> {
        if self.room.is_none() {
            return Err(CollabError::NoActiveRoom);
        }
        self.broadcast_changes();
        self.upload_files().await;
        Ok(())
    }

    /// Local pointer moved (or its button/selection changed).
    pub fn report_pointer(
        &mut self,
        pointer: Point,
        button: PointerButton,
        selected_element_ids: Vec<ElementId>,
    ) -> Result<(), CollabError> {
        if self.room.is_none() {
            return Err(CollabError::NoActiveRoom);
        }
        let now = Instant::now();

        if let Some(state) = self.presence.on_pointer_move(now) {
            self.send_presence(state);
        }

        if !self.collaborators.take_pointer_slot(now) {
            return Ok(());
        }
        let Some(socket_id) = self.room.as_ref().and_then(Room::socket_id) else {
            return Ok(());
        };
        let message = WireMessage::Pointer(PointerPayload {
            socket_id,
            pointer,
            button,
            selected_element_ids,
            username: self.config.username.clone(),
        });
        self.send(&message, true);
        Ok(())
    }

    /// The host window was hidden or shown.
    pub fn on_visibility_change(&mut self, visible: bool) {
        if let Some(state) = self.presence.on_visibility_change(visible, Instant::now()) {
            self.send_presence(state);
        }
    }

    fn broadcast_changes(&mut self) {
        let initialized = self.room.as_ref().is_some_and(Room::is_initialized);
        if !initialized {
            log::debug!("Room not initialized yet, holding back local changes");
            return;
        }
        let elements = self.host.scene_elements_including_deleted();
        if let Some(update) = self.scheduler.on_local_change(&elements, Instant::now()) {
            log::debug!("Broadcasting {} changed elements", update.len());
            self.send(&WireMessage::SceneUpdate { elements: update }, false);
        }
    }

    /// Upload new files, then mark their images saved so peers fetch them.
    async fn upload_files(&mut self) {
        let link = self.room_link();
        let elements = self.host.scene_elements_including_deleted();
        let cache = self.host.files();

        let outcome = match self
            .files
            .save_files(link.as_ref(), self.store.as_ref(), &elements, &cache)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("File upload rejected: {e}");
                self.host.report_error(&e);
                return;
            }
        };
        if outcome.saved.is_empty() {
            return;
        }

        let mut promoted = false;
        let elements: Vec<Element> = elements
            .into_iter()
            .map(|mut e| {
                let saved = e.file_id().is_some_and(|id| outcome.saved.contains(id));
                if saved && !e.is_deleted && e.file_status() == Some(FileStatus::Pending) {
                    e.mutate(|e| e.set_file_status(FileStatus::Saved));
                    promoted = true;
                }
                e
            })
            .collect();
        if promoted {
            self.host.replace_elements(elements);
            self.broadcast_changes();
        }
    }

    // ─── Inbound ──────────────────────────────────────────────────────

    /// Handle one event from the transport.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.room.is_none() {
            log::debug!("Dropping transport event without a room: {event:?}");
            return;
        }
        match event {
            TransportEvent::Frame(frame) => self.handle_frame(frame).await,
            TransportEvent::Disconnected => {
                log::warn!("Transport disconnected");
                self.disconnected = true;
            }
            TransportEvent::Error(e) => log::warn!("Transport error: {e}"),
        }
    }

    async fn handle_frame(&mut self, frame: RelayFrame) {
        match frame {
            RelayFrame::InitRoom { socket_id } => {
                log::debug!("Connected as {socket_id}");
                self.collaborators.set_local_socket_id(socket_id);
                if let Some(room) = self.room.as_mut() {
                    room.set_socket_id(socket_id);
                    if let Err(e) = room.join() {
                        log::warn!("Failed to join room {}: {e}", room.room_id);
                    }
                }
            }
            RelayFrame::FirstInRoom => {
                log::debug!("First in room");
                self.initialize_room(None);
            }
            RelayFrame::NewUser { socket_id } => {
                log::debug!("New user {socket_id}");
                self.send_scene_init();
            }
            RelayFrame::RoomUserChange { socket_ids } => {
                self.collaborators.set_peers(&socket_ids);
            }
            RelayFrame::ClientBroadcast { payload } => {
                let opened = match self.room.as_ref() {
                    Some(room) => room.open_payload(&payload),
                    None => return,
                };
                match opened {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => log::warn!("Ignoring unreadable payload: {e}"),
                }
            }
        }
    }

    async fn handle_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::SceneInit { elements } => {
                if self.room.as_ref().is_some_and(Room::is_initialized) {
                    log::debug!("Ignoring SCENE_INIT, room already initialized");
                    return;
                }
                let reconciled = self.apply_remote(elements).await;
                self.initialize_room(Some(reconciled));
            }
            WireMessage::SceneUpdate { elements } => {
                log::debug!("Applying SCENE_UPDATE with {} elements", elements.len());
                self.apply_remote(elements).await;
            }
            WireMessage::Pointer(payload) => {
                log::trace!("Pointer from {}", payload.socket_id);
                self.collaborators.apply_pointer(&payload);
            }
            WireMessage::Presence(payload) => {
                log::debug!("{} is {:?}", payload.socket_id, payload.user_state);
                self.collaborators.apply_presence(&payload);
            }
        }
    }

    /// Merge remote elements into the host scene.
    ///
    /// The merged version is recorded before the host sees it, so the merge
    /// is never echoed back.
    async fn apply_remote(&mut self, remote: Vec<Element>) -> Vec<Element> {
        let local = self.host.scene_elements_including_deleted();
        let protected = self.host.protected_element_ids();
        let reconciled = reconcile(&remote, &local, &protected);

        self.scheduler.record_received(&reconciled);
        self.host.replace_elements(reconciled.clone());
        self.host.clear_history();

        self.fetch_files(&reconciled).await;
        reconciled
    }

    async fn fetch_files(&mut self, elements: &[Element]) {
        let link = self.room_link();
        match self
            .files
            .fetch_missing(link.as_ref(), self.store.as_ref(), elements)
            .await
        {
            Ok(outcome) => {
                if !outcome.loaded.is_empty() {
                    self.host.add_files(outcome.loaded);
                }
            }
            Err(e) => {
                log::warn!("File fetch failed: {e}");
                self.host.report_error(&e);
            }
        }
    }

    fn initialize_room(&mut self, scene: InitialScene) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        room.resolve_initial_scene(scene);
        if room.mark_initialized() {
            self.scheduler.arm_full_sync(Instant::now());
        }
    }

    // ─── Timers ───────────────────────────────────────────────────────

    /// Earliest pending timer deadline.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let room = self.room.as_ref()?;
        [
            room.init_deadline(),
            self.scheduler.next_deadline(),
            self.snapshot_deadline,
            self.presence.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fire every timer that is due.
    pub async fn handle_wakeup(&mut self) {
        let now = Instant::now();
        let Some(room) = self.room.as_ref() else {
            return;
        };

        if room.init_deadline().is_some_and(|d| d <= now) && !room.is_initialized() {
            log::warn!("No initial scene for room {} in time, continuing without", room.room_id);
            self.initialize_room(None);
        }

        let full_sync = self.scheduler.take_due_full_sync(now);
        if full_sync {
            self.send_full_scene();
        }

        let snapshot_due = self.snapshot_deadline.is_some_and(|d| d <= now);
        if snapshot_due {
            self.snapshot_deadline = self
                .snapshot_deadline
                .map(|d| next_tick(d, now, self.config.snapshot_interval));
        }
        if full_sync || snapshot_due {
            self.persist_snapshot().await;
        }

        if let Some(state) = self.presence.poll(now) {
            self.send_presence(state);
        }
    }

    /// Wait for the next transport event or timer and handle it.
    ///
    /// Returns `false` when there is nothing left to wait for.
    pub async fn step(&mut self) -> bool {
        let deadline = self.next_wakeup();
        let disconnected = self.disconnected;
        let Some(room) = self.room.as_mut() else {
            return false;
        };
        if disconnected && deadline.is_none() {
            return false;
        }

        let wakeup = tokio::select! {
            event = room.transport_mut().recv(), if !disconnected => Wakeup::Event(event),
            _ = sleep_until(deadline) => Wakeup::Timer,
        };

        match wakeup {
            Wakeup::Event(Some(event)) => self.handle_transport_event(event).await,
            Wakeup::Event(None) => {
                log::warn!("Transport closed");
                self.disconnected = true;
            }
            Wakeup::Timer => self.handle_wakeup().await,
        }
        true
    }

    // ─── Outbound helpers ─────────────────────────────────────────────

    fn send_full_scene(&mut self) {
        if !self.room.as_ref().is_some_and(Room::is_initialized) {
            return;
        }
        let elements = self.host.scene_elements_including_deleted();
        let full = self.scheduler.full_scene(&elements);
        log::debug!("Full resync with {} elements", full.len());
        self.send(&WireMessage::SceneUpdate { elements: full }, false);
    }

    fn send_scene_init(&mut self) {
        if !self.room.as_ref().is_some_and(Room::is_initialized) {
            log::debug!("Not answering newcomer before initialization");
            return;
        }
        let elements = self.host.scene_elements_including_deleted();
        let full = self.scheduler.full_scene(&elements);
        self.send(&WireMessage::SceneInit { elements: full }, false);
    }

    fn send_presence(&mut self, user_state: UserIdleState) {
        let Some(socket_id) = self.room.as_ref().and_then(Room::socket_id) else {
            return;
        };
        let message = WireMessage::Presence(PresencePayload {
            socket_id,
            user_state,
            username: self.config.username.clone(),
        });
        self.send(&message, false);
    }

    fn send(&self, message: &WireMessage, volatile: bool) {
        let Some(room) = self.room.as_ref() else {
            return;
        };
        if let Err(e) = room.broadcast(message, volatile) {
            log::warn!("Failed to send {:?}: {e}", message.kind());
        }
    }

    /// Save the scene snapshot; stored elements we lacked are applied locally.
    async fn persist_snapshot(&mut self) {
        let Some(link) = self.room_link() else {
            return;
        };
        let elements = self.host.scene_elements_including_deleted();
        let protected = self.host.protected_element_ids();

        let store = Arc::clone(&self.store);
        match self
            .persister
            .save(store.as_ref(), &link.room_id, &link.room_key, &elements, &protected)
            .await
        {
            Ok(Some(merged)) => {
                log::debug!("Stored snapshot had newer elements, applying");
                self.apply_remote(merged).await;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Failed to persist room {}: {e}", link.room_id);
                self.host.report_error(&e);
            }
        }
    }
}

/// First tick of a fixed cadence after `now`, skipping missed ones.
fn next_tick(last: Instant, now: Instant, interval: Duration) -> Instant {
    let interval = interval.max(Duration::from_millis(1));
    let mut next = last + interval;
    while next <= now {
        next += interval;
    }
    next
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::host::MemoryCanvas;
    use crate::protocol::ClientFrame;
    use crate::storage::MemoryStore;

    fn session() -> Collab<MemoryCanvas> {
        Collab::new(
            MemoryCanvas::new(),
            Arc::new(MemoryStore::new()),
            CollabConfig::for_testing(),
        )
    }

    #[test]
    fn test_config_default() {
        let config = CollabConfig::default();
        assert_eq!(config.init_timeout, Duration::from_secs(5));
        assert_eq!(config.full_sync_interval, Duration::from_secs(20));
        assert_eq!(config.snapshot_interval, Duration::from_secs(20));
        assert_eq!(config.pointer_sync_interval, Duration::from_millis(33));
        assert_eq!(config.max_file_batch_bytes, 4 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_operations_without_room_abort() {
        let mut collab = session();
        assert!(matches!(
            collab.send_local_mutation().await,
            Err(CollabError::NoActiveRoom)
        ));
        assert!(matches!(
            collab.report_pointer(Point::ZERO, PointerButton::Up, Vec::new()),
            Err(CollabError::NoActiveRoom)
        ));
        assert!(!collab.state().is_collaborating);
        assert_eq!(collab.next_wakeup(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_room_drops_deleted_and_resets_images() {
        let mut gone = Element::new("gone", ElementKind::Rectangle).with_bounds(0.0, 0.0, 5.0, 5.0);
        gone.delete();
        let image = Element::new(
            "img",
            ElementKind::Image { file_id: "f1".into(), status: FileStatus::Saved },
        )
        .with_bounds(0.0, 0.0, 5.0, 5.0);
        let mut collab = Collab::new(
            MemoryCanvas::with_elements(vec![gone, image]),
            Arc::new(MemoryStore::new()),
            CollabConfig::for_testing(),
        );

        let (transport, _remote) = TransportHandle::channel(16);
        collab.open_room(None, transport).await.unwrap();

        let elements = collab.host().elements();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].id, "img");
        assert_eq!(elements[0].file_status(), Some(FileStatus::Pending));
        assert_eq!(elements[0].version, 2);
        assert!(collab.state().is_collaborating);
    }

    #[test]
    fn test_next_tick_skips_missed_ticks() {
        let start = Instant::now();
        let interval = Duration::from_secs(2);
        assert_eq!(next_tick(start, start, interval), start + interval);
        assert_eq!(next_tick(start, start + Duration::from_secs(5), interval), start + Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_room_answers_with_join() {
        let mut collab = session();
        let (transport, mut remote) = TransportHandle::channel(16);
        let opened = collab.open_room(None, transport).await.unwrap();

        let me = uuid::Uuid::new_v4();
        collab
            .handle_transport_event(TransportEvent::Frame(RelayFrame::InitRoom { socket_id: me }))
            .await;

        assert_eq!(
            remote.try_next_frame(),
            Some(ClientFrame::JoinRoom { room_id: opened.link.room_id.clone() })
        );
        assert_eq!(collab.collaborators().local_socket_id(), Some(me));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_unblocks_caller() {
        let mut collab = session();
        let (transport, _remote) = TransportHandle::channel(16);
        let opened = collab
            .open_room(Some(RoomLink::generate()), transport)
            .await
            .unwrap();
        assert!(!collab.diagnostics().initialized);

        // The only pending events are timers; the init timeout fires first.
        assert!(collab.step().await);
        assert!(collab.diagnostics().initialized);
        assert_eq!(opened.initial_scene.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_changes_held_until_initialized() {
        let mut collab = session();
        let (transport, mut remote) = TransportHandle::channel(16);
        collab.open_room(None, transport).await.unwrap();

        collab
            .host_mut()
            .insert(Element::new("a", ElementKind::Rectangle).with_bounds(0.0, 0.0, 9.0, 9.0));
        collab.send_local_mutation().await.unwrap();
        assert!(remote.drain_frames().is_empty());

        collab
            .handle_transport_event(TransportEvent::Frame(RelayFrame::FirstInRoom))
            .await;
        collab.send_local_mutation().await.unwrap();
        let frames = remote.drain_frames();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], ClientFrame::Broadcast { volatile: false, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_room_resets_state() {
        let mut collab = session();
        let (transport, _remote) = TransportHandle::channel(16);
        let opened = collab.open_room(None, transport).await.unwrap();
        collab
            .host_mut()
            .insert(Element::new("a", ElementKind::Rectangle).with_bounds(0.0, 0.0, 9.0, 9.0));

        collab.close_room(false).await;

        assert!(!collab.is_collaborating());
        assert!(collab.host().elements().is_empty());
        assert_eq!(collab.diagnostics().room_id, None);
        assert_eq!(opened.initial_scene.await.unwrap(), None);
        assert!(!collab.step().await);
    }
}
