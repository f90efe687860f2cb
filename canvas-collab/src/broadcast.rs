//! Relay-side fan-out of frames to the members of a room.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each member gets an independent receiver that buffers up to `capacity`
//! frames; a member that falls further behind loses the oldest ones.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::protocol::SocketId;

/// A pre-encoded relay frame plus its routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomFrame {
    /// Member that must not receive the frame (usually its sender).
    pub skip: Option<SocketId>,
    /// May be dropped for members that are lagging.
    pub volatile: bool,
    pub bytes: Vec<u8>,
}

impl RoomFrame {
    pub fn to_all(bytes: Vec<u8>) -> Self {
        Self { skip: None, volatile: false, bytes }
    }

    pub fn to_others(sender: SocketId, volatile: bool, bytes: Vec<u8>) -> Self {
        Self { skip: Some(sender), volatile, bytes }
    }

    /// Whether `member` should get this frame.
    pub fn is_for(&self, member: &SocketId) -> bool {
        self.skip.as_ref() != Some(member)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Atomic broadcast stats, read via `stats()`.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RoomFrame>>,
    members: RwLock<HashSet<SocketId>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(HashSet::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Add a member; returns its receiver and the membership after joining.
    pub async fn add_peer(
        &self,
        socket_id: SocketId,
    ) -> (broadcast::Receiver<Arc<RoomFrame>>, Vec<SocketId>) {
        let mut members = self.members.write().await;
        members.insert(socket_id);
        (self.sender.subscribe(), members.iter().copied().collect())
    }

    /// Remove a member; returns the membership after leaving.
    pub async fn remove_peer(&self, socket_id: &SocketId) -> Vec<SocketId> {
        let mut members = self.members.write().await;
        members.remove(socket_id);
        members.iter().copied().collect()
    }

    /// Fan a frame out to every subscriber. Returns the receiver count.
    pub fn broadcast(&self, frame: RoomFrame) -> usize {
        let count = self.sender.send(Arc::new(frame)).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Count a frame a lagging member never got.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn has_peer(&self, socket_id: &SocketId) -> bool {
        self.members.read().await.contains(socket_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.members.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room manager: maps room ids to broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `room_id`.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(room_id.to_string(), room.clone());
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Remove a room that has no members left.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.peer_count().await == 0 {
                rooms.remove(room_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
