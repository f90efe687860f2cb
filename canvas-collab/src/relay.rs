//! Untrusted WebSocket relay with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── BroadcastGroup
//! Client B ──┘          │
//!                       ├── NewUser / RoomUserChange  (membership, cleartext)
//!                       └── ClientBroadcast           (ciphertext, opaque)
//!                                 │
//!                      ┌──────────┼───────────┐
//!                      ▼          ▼           ▼
//!                   Client A   Client B    Client C
//! ```
//!
//! The relay never holds room keys. It assigns socket ids, tracks who is in
//! which room and forwards payloads byte for byte.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomFrame, RoomManager};
use crate::protocol::{ClientFrame, RelayFrame, SocketId};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Joins beyond this many members are refused
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

impl RelayConfig {
    /// Ephemeral port and small buffers.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            max_peers_per_room: 8,
            broadcast_capacity: 64,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

/// Per-connection context shared with the spawned handler.
#[derive(Clone)]
struct RelayContext {
    config: RelayConfig,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

/// Room membership of one connection.
///
/// `rx` is subscribed before the join is announced, so the member sees its
/// own `RoomUserChange`.
struct Membership {
    room_id: String,
    group: Arc<BroadcastGroup>,
    rx: broadcast::Receiver<Arc<RoomFrame>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            room_manager,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let ctx = RelayContext {
                config: self.config.clone(),
                room_manager: self.room_manager.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: RelayContext,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let socket_id: SocketId = Uuid::new_v4();
    log::info!("WebSocket connection established from {addr} as {socket_id}");

    {
        let mut s = ctx.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let hello = RelayFrame::InitRoom { socket_id }.encode()?;
    ws_sender.send(Message::Binary(hello.into())).await?;

    let mut membership: Option<Membership> = None;

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = ctx.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }

                            let frame = match ClientFrame::decode(&data) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            match frame {
                                ClientFrame::JoinRoom { room_id } => {
                                    if let Some(old) = membership.take() {
                                        leave_room(&ctx, old, socket_id).await?;
                                    }
                                    if let Some((joined, member_count)) = join_room(&ctx, &room_id, socket_id).await? {
                                        if member_count == 1 {
                                            let first = RelayFrame::FirstInRoom.encode()?;
                                            ws_sender.send(Message::Binary(first.into())).await?;
                                        }
                                        membership = Some(joined);
                                    }
                                }

                                ClientFrame::Broadcast { room_id, volatile, payload } => {
                                    match &membership {
                                        Some(m) if m.room_id == room_id => {
                                            let bytes = RelayFrame::ClientBroadcast { payload }.encode()?;
                                            m.group.broadcast(RoomFrame::to_others(socket_id, volatile, bytes));
                                        }
                                        _ => log::debug!("{socket_id} broadcast to room {room_id} it has not joined"),
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing room frame
                frame = async {
                    match membership.as_mut() {
                        Some(m) => m.rx.recv().await,
                        // Not in a room yet, wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Ok(frame) => {
                            if !frame.is_for(&socket_id) {
                                continue;
                            }
                            if let Some(m) = &membership {
                                if frame.volatile && m.rx.len() > m.group.capacity() / 2 {
                                    m.group.record_dropped(1);
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(frame.bytes.clone().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer {socket_id} lagged by {n} frames");
                            if let Some(m) = &membership {
                                m.group.record_dropped(n);
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    // Cleanup: leave the room even when the loop failed
    if let Some(m) = membership.take() {
        leave_room(&ctx, m, socket_id).await?;
    }
    {
        let mut s = ctx.stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }

    result
}

async fn join_room(
    ctx: &RelayContext,
    room_id: &str,
    socket_id: SocketId,
) -> Result<Option<(Membership, usize)>, BoxError> {
    let group = ctx.room_manager.get_or_create(room_id).await;
    if group.peer_count().await >= ctx.config.max_peers_per_room {
        log::warn!("Room {room_id} is full, refusing {socket_id}");
        ctx.room_manager.remove_if_empty(room_id).await;
        return Ok(None);
    }

    let (rx, members) = group.add_peer(socket_id).await;
    let member_count = members.len();
    if member_count > 1 {
        let new_user = RelayFrame::NewUser { socket_id }.encode()?;
        group.broadcast(RoomFrame::to_others(socket_id, false, new_user));
    }
    let change = RelayFrame::RoomUserChange { socket_ids: members }.encode()?;
    group.broadcast(RoomFrame::to_all(change));

    {
        let mut s = ctx.stats.write().await;
        s.active_rooms = ctx.room_manager.room_count().await;
    }
    log::info!("{socket_id} joined room {room_id}");

    let membership = Membership {
        room_id: room_id.to_string(),
        group,
        rx,
    };
    Ok(Some((membership, member_count)))
}

async fn leave_room(
    ctx: &RelayContext,
    membership: Membership,
    socket_id: SocketId,
) -> Result<(), BoxError> {
    let Membership { room_id, group, rx } = membership;
    drop(rx);

    let members = group.remove_peer(&socket_id).await;
    if members.is_empty() {
        if ctx.room_manager.remove_if_empty(&room_id).await {
            log::info!("Room {room_id} removed (empty)");
        }
    } else {
        let change = RelayFrame::RoomUserChange { socket_ids: members }.encode()?;
        group.broadcast(RoomFrame::to_all(change));
    }

    let mut s = ctx.stats.write().await;
    s.active_rooms = ctx.room_manager.room_count().await;
    log::info!("{socket_id} left room {room_id}");
    Ok(())
}
