//! Session integration tests.
//!
//! Two or more `Collab` sessions wired through in-memory transports; the test
//! plays the relay by forwarding broadcasts between them. Time is paused so
//! timer behavior is deterministic.

use std::sync::Arc;

use canvas_collab::host::{CanvasHost, MemoryCanvas};
use canvas_collab::persist;
use canvas_collab::{
    BinaryFile, ClientFrame, Collab, CollabConfig, Element, ElementKind, FileStatus,
    InitialScene, MemoryStore, Point, PointerButton, RelayFrame, RoomLink, SceneStore, SocketId,
    TransportEvent, TransportHandle, TransportRemote, UserIdleState, WireMessage,
};
use tokio::sync::oneshot;
use tokio::time::Duration;
use uuid::Uuid;

// ─── Helpers ─────────────────────────────────────────────────────────────────

struct Peer {
    collab: Collab<MemoryCanvas>,
    remote: TransportRemote,
    socket_id: SocketId,
    link: RoomLink,
}

fn rect(id: &str) -> Element {
    Element::new(id, ElementKind::Rectangle).with_bounds(0.0, 0.0, 20.0, 20.0)
}

fn ids(elements: &[Element]) -> Vec<&str> {
    elements.iter().map(|e| e.id.as_str()).collect()
}

/// Open a room and complete the relay handshake (InitRoom → JoinRoom).
async fn open_peer(
    canvas: MemoryCanvas,
    store: Arc<dyn SceneStore>,
    link: Option<RoomLink>,
) -> (Peer, oneshot::Receiver<InitialScene>) {
    let mut collab = Collab::new(canvas, store, CollabConfig::for_testing());
    let (transport, mut remote) = TransportHandle::channel(64);
    let opened = collab.open_room(link, transport).await.unwrap();

    let socket_id = Uuid::new_v4();
    collab
        .handle_transport_event(TransportEvent::Frame(RelayFrame::InitRoom { socket_id }))
        .await;
    match remote.try_next_frame() {
        Some(ClientFrame::JoinRoom { room_id }) => assert_eq!(room_id, opened.link.room_id),
        other => panic!("Expected JoinRoom, got {other:?}"),
    }

    let peer = Peer {
        collab,
        remote,
        socket_id,
        link: opened.link,
    };
    (peer, opened.initial_scene)
}

async fn relay_event(peer: &mut Peer, frame: RelayFrame) {
    peer.collab
        .handle_transport_event(TransportEvent::Frame(frame))
        .await;
}

/// Forward every broadcast `from` queued to `to`. Returns the number forwarded.
async fn forward(from: &mut Peer, to: &mut Peer) -> usize {
    let mut forwarded = 0;
    for frame in from.remote.drain_frames() {
        if let ClientFrame::Broadcast { payload, .. } = frame {
            relay_event(to, RelayFrame::ClientBroadcast { payload }).await;
            forwarded += 1;
        }
    }
    forwarded
}

/// Decrypt every broadcast `peer` queued.
fn sent_messages(peer: &mut Peer) -> Vec<WireMessage> {
    let frames = peer.remote.drain_frames();
    frames
        .into_iter()
        .filter_map(|frame| match frame {
            ClientFrame::Broadcast { payload, .. } => {
                let plain = peer.link.room_key.decrypt(&payload).unwrap();
                Some(WireMessage::decode(&plain).unwrap())
            }
            ClientFrame::JoinRoom { .. } => None,
        })
        .collect()
}

/// Element lists of the SCENE_UPDATE messages among `messages`.
fn scene_updates(messages: Vec<WireMessage>) -> Vec<Vec<Element>> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            WireMessage::SceneUpdate { elements } => Some(elements),
            _ => None,
        })
        .collect()
}

fn idle_messages(messages: &[WireMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, WireMessage::Presence(p) if p.user_state == UserIdleState::Idle))
        .count()
}

/// Alice creates a room holding `elements`; Bob joins and receives SCENE_INIT.
async fn synced_pair(elements: Vec<Element>) -> (Peer, Peer) {
    let (mut alice, _) = open_peer(
        MemoryCanvas::with_elements(elements),
        Arc::new(MemoryStore::new()),
        None,
    )
    .await;
    relay_event(&mut alice, RelayFrame::FirstInRoom).await;

    let (mut bob, _) = open_peer(
        MemoryCanvas::new(),
        Arc::new(MemoryStore::new()),
        Some(alice.link.clone()),
    )
    .await;
    relay_event(&mut alice, RelayFrame::NewUser { socket_id: bob.socket_id }).await;
    assert_eq!(forward(&mut alice, &mut bob).await, 1);
    (alice, bob)
}

// ─── Room join ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_newcomer_receives_scene_init() {
    let (mut alice, _) = open_peer(
        MemoryCanvas::with_elements(vec![rect("r1"), rect("r2")]),
        Arc::new(MemoryStore::new()),
        None,
    )
    .await;
    relay_event(&mut alice, RelayFrame::FirstInRoom).await;

    let (mut bob, initial) = open_peer(
        MemoryCanvas::new(),
        Arc::new(MemoryStore::new()),
        Some(alice.link.clone()),
    )
    .await;
    assert!(!bob.collab.diagnostics().initialized);

    relay_event(&mut alice, RelayFrame::NewUser { socket_id: bob.socket_id }).await;
    assert_eq!(forward(&mut alice, &mut bob).await, 1);

    let scene = initial.await.unwrap().expect("initial scene");
    assert_eq!(ids(&scene), vec!["r1", "r2"]);
    assert_eq!(bob.collab.host().elements(), alice.collab.host().elements());
    assert!(bob.collab.diagnostics().initialized);
}

#[tokio::test(start_paused = true)]
async fn test_second_scene_init_ignored() {
    let (mut alice, mut bob) = synced_pair(vec![rect("r1")]).await;

    // A late SCENE_INIT from someone else must not be applied again
    alice.collab.host_mut().insert(rect("r2"));
    relay_event(&mut alice, RelayFrame::NewUser { socket_id: Uuid::new_v4() }).await;
    forward(&mut alice, &mut bob).await;

    assert_eq!(ids(bob.collab.host().elements()), vec!["r1"]);
}

#[tokio::test(start_paused = true)]
async fn test_uninitialized_peer_does_not_answer_newcomer() {
    let (mut alice, _) =
        open_peer(MemoryCanvas::new(), Arc::new(MemoryStore::new()), Some(RoomLink::generate()))
            .await;
    relay_event(&mut alice, RelayFrame::NewUser { socket_id: Uuid::new_v4() }).await;
    assert!(sent_messages(&mut alice).is_empty());
}

// ─── Scene sync ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_edit_lower_nonce_wins() {
    let (mut alice, mut bob) = synced_pair(vec![rect("e1")]).await;

    let base = alice.collab.host().element("e1").unwrap().clone();
    let mut from_alice = base.clone();
    from_alice.version = base.version + 1;
    from_alice.version_nonce = 7;
    from_alice.x = 100.0;
    let mut from_bob = base.clone();
    from_bob.version = base.version + 1;
    from_bob.version_nonce = 3;
    from_bob.x = 200.0;

    alice.collab.host_mut().replace_elements(vec![from_alice]);
    bob.collab.host_mut().replace_elements(vec![from_bob.clone()]);
    alice.collab.send_local_mutation().await.unwrap();
    bob.collab.send_local_mutation().await.unwrap();

    assert_eq!(forward(&mut alice, &mut bob).await, 1);
    assert_eq!(forward(&mut bob, &mut alice).await, 1);

    assert_eq!(alice.collab.host().elements(), &[from_bob.clone()]);
    assert_eq!(bob.collab.host().elements(), &[from_bob]);
}

#[tokio::test(start_paused = true)]
async fn test_received_update_is_not_echoed() {
    let (mut alice, mut bob) = synced_pair(vec![rect("r1")]).await;

    alice.collab.host_mut().insert(rect("r2"));
    alice.collab.send_local_mutation().await.unwrap();
    assert_eq!(forward(&mut alice, &mut bob).await, 1);
    assert_eq!(ids(bob.collab.host().elements()), vec!["r2", "r1"]);

    bob.collab.send_local_mutation().await.unwrap();
    assert!(sent_messages(&mut bob).is_empty());
    assert_eq!(
        bob.collab.diagnostics().last_version,
        alice.collab.diagnostics().last_version
    );
}

#[tokio::test(start_paused = true)]
async fn test_incremental_update_carries_only_changes() {
    let (mut alice, _bob) = synced_pair(vec![rect("r1"), rect("r2")]).await;

    alice.collab.host_mut().edit("r2", |e| e.x = 50.0);
    alice.collab.send_local_mutation().await.unwrap();

    match sent_messages(&mut alice).as_slice() {
        [WireMessage::SceneUpdate { elements }] => assert_eq!(ids(elements), vec!["r2"]),
        other => panic!("Expected one SceneUpdate, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_protected_element_survives_remote_update() {
    let (mut alice, mut bob) = synced_pair(vec![rect("e1")]).await;

    bob.collab.host_mut().begin_edit("e1");
    alice.collab.host_mut().edit("e1", |e| e.width = 99.0);
    alice.collab.send_local_mutation().await.unwrap();
    forward(&mut alice, &mut bob).await;

    let kept = bob.collab.host().element("e1").unwrap();
    assert_eq!(kept.version, 1);
    assert_eq!(kept.width, 20.0);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_propagates_as_tombstone() {
    let mut text = Element::new("t1", ElementKind::Text { text: "hello".into() })
        .with_bounds(0.0, 0.0, 40.0, 10.0);
    text.version = 3;
    let (mut alice, mut bob) = synced_pair(vec![text]).await;

    alice.collab.host_mut().edit("t1", |e| e.is_deleted = true);
    alice.collab.send_local_mutation().await.unwrap();
    forward(&mut alice, &mut bob).await;

    let gone = bob.collab.host().element("t1").unwrap();
    assert!(gone.is_deleted);
    assert_eq!(gone.version, 4);
    assert_eq!(gone.kind, ElementKind::Text { text: String::new() });
}

#[tokio::test(start_paused = true)]
async fn test_full_resync_after_interval() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, _) =
        open_peer(MemoryCanvas::with_elements(vec![rect("r1")]), store.clone(), None).await;
    relay_event(&mut alice, RelayFrame::FirstInRoom).await;

    alice.collab.host_mut().insert(rect("r2"));
    alice.collab.send_local_mutation().await.unwrap();
    assert_eq!(sent_messages(&mut alice).len(), 1);

    let interval = alice.collab.config().full_sync_interval;
    tokio::time::advance(interval).await;
    alice.collab.handle_wakeup().await;

    // The presence heartbeat may go out on the same wakeup
    let updates = scene_updates(sent_messages(&mut alice));
    assert_eq!(updates.len(), 1);
    assert_eq!(ids(&updates[0]), vec!["r1", "r2"]);

    let stored = persist::load_scene(store.as_ref(), &alice.link.room_id, &alice.link.room_key)
        .await
        .unwrap()
        .expect("snapshot saved on resync");
    assert_eq!(ids(&stored), vec!["r1", "r2"]);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_saved_under_steady_editing() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, _) =
        open_peer(MemoryCanvas::with_elements(vec![rect("r1")]), store.clone(), None).await;
    relay_event(&mut alice, RelayFrame::FirstInRoom).await;
    let step = alice.collab.config().full_sync_interval / 2;
    let stored_ids = |store: Arc<MemoryStore>, link: RoomLink| async move {
        let stored = persist::load_scene(store.as_ref(), &link.room_id, &link.room_key)
            .await
            .unwrap()
            .unwrap();
        stored.into_iter().map(|e| e.id).collect::<Vec<_>>()
    };

    // Every edit restarts the resync deadline, so it never fires
    for i in 2..=5 {
        alice.collab.host_mut().insert(rect(&format!("r{i}")));
        alice.collab.send_local_mutation().await.unwrap();
        tokio::time::advance(step).await;
        alice.collab.handle_wakeup().await;
    }

    let updates = scene_updates(sent_messages(&mut alice));
    let sizes: Vec<usize> = updates.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 1, 1, 1], "no full resync expected");
    assert_eq!(
        stored_ids(store.clone(), alice.link.clone()).await,
        vec!["r1", "r2", "r3", "r4", "r5"]
    );

    alice.collab.host_mut().insert(rect("r6"));
    alice.collab.send_local_mutation().await.unwrap();
    tokio::time::advance(step * 2).await;
    alice.collab.handle_wakeup().await;
    assert_eq!(stored_ids(store, alice.link.clone()).await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_tracked_version_never_decreases() {
    let (mut alice, mut bob) = synced_pair(vec![rect("a"), rect("b"), rect("c")]).await;
    let mut seen = vec![bob.collab.diagnostics().last_version];
    let mut record = |bob: &Peer| {
        let version = bob.collab.diagnostics().last_version;
        assert!(version >= *seen.last().unwrap(), "version went from {seen:?} to {version}");
        seen.push(version);
    };

    // Remote edit
    alice.collab.host_mut().edit("a", |e| e.x = 10.0);
    alice.collab.send_local_mutation().await.unwrap();
    forward(&mut alice, &mut bob).await;
    record(&bob);

    // Local edit, then a local shrink that lowers the scene version
    bob.collab.host_mut().edit("b", |e| e.y = 5.0);
    bob.collab.send_local_mutation().await.unwrap();
    record(&bob);
    bob.collab.host_mut().edit("c", |e| {
        e.width = 0.0;
        e.height = 0.0;
    });
    bob.collab.send_local_mutation().await.unwrap();
    record(&bob);

    // Stale remote update carrying older versions
    let stale = WireMessage::SceneUpdate { elements: vec![rect("a"), rect("b")] };
    let payload = bob.link.room_key.encrypt(&stale.encode().unwrap()).unwrap();
    relay_event(&mut bob, RelayFrame::ClientBroadcast { payload }).await;
    record(&bob);
    assert_eq!(bob.collab.host().element("a").unwrap().version, 2);

    // Edit after the shrink still reaches alice
    sent_messages(&mut bob);
    bob.collab.host_mut().edit("a", |e| e.x = 99.0);
    bob.collab.send_local_mutation().await.unwrap();
    record(&bob);
    assert_eq!(forward(&mut bob, &mut alice).await, 1);
    assert_eq!(alice.collab.host().element("a").unwrap().x, 99.0);
}

// ─── Presence ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pointer_and_presence_reach_peer() {
    let (mut alice, mut bob) = synced_pair(vec![rect("e1")]).await;

    alice
        .collab
        .report_pointer(Point::new(3.0, 4.0), PointerButton::Down, vec!["e1".into()])
        .unwrap();
    assert_eq!(forward(&mut alice, &mut bob).await, 1);

    let seen = bob.collab.collaborators().get(&alice.socket_id).unwrap();
    assert_eq!(seen.pointer, Some(Point::new(3.0, 4.0)));
    assert_eq!(seen.button, PointerButton::Down);
    assert_eq!(seen.selected_element_ids, vec!["e1".to_string()]);
    assert_eq!(seen.username.as_deref(), Some("tester"));

    alice.collab.on_visibility_change(false);
    assert_eq!(forward(&mut alice, &mut bob).await, 1);
    let seen = bob.collab.collaborators().get(&alice.socket_id).unwrap();
    assert_eq!(seen.idle_state, Some(UserIdleState::Away));
    assert_eq!(alice.collab.state().idle_state, UserIdleState::Away);
}

#[tokio::test(start_paused = true)]
async fn test_pointer_is_throttled() {
    let (mut alice, _bob) = synced_pair(vec![rect("e1")]).await;

    for i in 0..5 {
        alice
            .collab
            .report_pointer(Point::new(i as f64, 0.0), PointerButton::Up, Vec::new())
            .unwrap();
    }
    assert_eq!(sent_messages(&mut alice).len(), 1);

    tokio::time::advance(alice.collab.config().pointer_sync_interval).await;
    alice
        .collab
        .report_pointer(Point::new(9.0, 9.0), PointerButton::Up, Vec::new())
        .unwrap();
    assert_eq!(sent_messages(&mut alice).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_room_user_change_replaces_collaborators() {
    let (_alice, mut bob) = synced_pair(vec![rect("e1")]).await;
    let carol = Uuid::new_v4();
    let dave = Uuid::new_v4();
    let bob_id = bob.socket_id;

    relay_event(
        &mut bob,
        RelayFrame::RoomUserChange { socket_ids: vec![carol, dave, bob_id] },
    )
    .await;
    assert_eq!(bob.collab.collaborators().len(), 2);

    relay_event(&mut bob, RelayFrame::RoomUserChange { socket_ids: vec![dave, bob_id] }).await;
    assert_eq!(bob.collab.collaborators().len(), 1);
    assert!(bob.collab.collaborators().get(&carol).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_idle_after_threshold_without_motion() {
    let (mut alice, _) =
        open_peer(MemoryCanvas::new(), Arc::new(MemoryStore::new()), None).await;
    relay_event(&mut alice, RelayFrame::FirstInRoom).await;
    let threshold = alice.collab.config().idle_threshold;

    // One movement one second in pushes the idle deadline back a second
    tokio::time::advance(Duration::from_secs(1)).await;
    alice
        .collab
        .report_pointer(Point::ZERO, PointerButton::Up, Vec::new())
        .unwrap();
    sent_messages(&mut alice);

    tokio::time::advance(threshold - Duration::from_secs(1)).await;
    alice.collab.handle_wakeup().await;
    assert_eq!(idle_messages(&sent_messages(&mut alice)), 0);
    assert_eq!(alice.collab.state().idle_state, UserIdleState::Active);

    tokio::time::advance(Duration::from_secs(1)).await;
    alice.collab.handle_wakeup().await;
    assert_eq!(idle_messages(&sent_messages(&mut alice)), 1);
    assert_eq!(alice.collab.state().idle_state, UserIdleState::Idle);

    // No second Idle while nothing changes
    tokio::time::advance(threshold).await;
    alice.collab.handle_wakeup().await;
    assert_eq!(idle_messages(&sent_messages(&mut alice)), 0);
}

// ─── Files ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_uploaded_image_is_fetched_by_peer() {
    let store: Arc<dyn SceneStore> = Arc::new(MemoryStore::new());
    let image = Element::new(
        "img",
        ElementKind::Image { file_id: "f1".into(), status: FileStatus::Pending },
    )
    .with_bounds(0.0, 0.0, 64.0, 64.0);
    let mut canvas = MemoryCanvas::with_elements(vec![image]);
    let file = BinaryFile {
        id: "f1".into(),
        mime_type: "image/png".into(),
        data: vec![1, 2, 3, 4],
        created: 0,
    };
    canvas.add_files(vec![file.clone()]);

    let (mut alice, _) = open_peer(canvas, store.clone(), None).await;
    assert_eq!(
        alice.collab.host().element("img").unwrap().file_status(),
        Some(FileStatus::Saved)
    );

    let (mut bob, _) = open_peer(MemoryCanvas::new(), store, Some(alice.link.clone())).await;
    assert!(bob.collab.host().files().is_empty());

    relay_event(&mut alice, RelayFrame::FirstInRoom).await;
    alice.collab.send_local_mutation().await.unwrap();
    assert_eq!(forward(&mut alice, &mut bob).await, 1);

    assert_eq!(bob.collab.host().files().get("f1"), Some(&file));
    assert_eq!(bob.collab.diagnostics().handled_files, 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_upload_reported_to_host() {
    let image = Element::new(
        "img",
        ElementKind::Image { file_id: "big".into(), status: FileStatus::Pending },
    )
    .with_bounds(0.0, 0.0, 64.0, 64.0);
    let mut canvas = MemoryCanvas::with_elements(vec![image]);
    let max = CollabConfig::for_testing().max_file_batch_bytes;
    canvas.add_files(vec![BinaryFile {
        id: "big".into(),
        mime_type: "image/png".into(),
        data: vec![0; max + 1],
        created: 0,
    }]);

    let (alice, _) = open_peer(canvas, Arc::new(MemoryStore::new()), None).await;
    assert_eq!(alice.collab.host().errors().len(), 1);
    assert_eq!(
        alice.collab.host().element("img").unwrap().file_status(),
        Some(FileStatus::Pending)
    );
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_reopen_closes_previous_room() {
    let (mut alice, first_scene) =
        open_peer(MemoryCanvas::new(), Arc::new(MemoryStore::new()), Some(RoomLink::generate()))
            .await;
    let first_room = alice.link.room_id.clone();

    let (transport, _remote) = TransportHandle::channel(8);
    let opened = alice.collab.open_room(None, transport).await.unwrap();

    assert_ne!(opened.link.room_id, first_room);
    assert_eq!(first_scene.await.unwrap(), None);
    assert_eq!(
        alice.collab.diagnostics().room_id.as_deref(),
        Some(opened.link.room_id.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_step_drives_init_timeout_and_events() {
    let (mut alice, initial) =
        open_peer(MemoryCanvas::new(), Arc::new(MemoryStore::new()), Some(RoomLink::generate()))
            .await;

    alice
        .remote
        .deliver(RelayFrame::RoomUserChange { socket_ids: vec![Uuid::new_v4(), alice.socket_id] })
        .await
        .unwrap();
    assert!(alice.collab.step().await);
    assert_eq!(alice.collab.collaborators().len(), 1);

    // Nothing else queued: the init timeout fires next
    assert!(alice.collab.step().await);
    assert!(alice.collab.diagnostics().initialized);
    assert_eq!(initial.await.unwrap(), None);
}
