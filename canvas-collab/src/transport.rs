//! Boundary between a session and whatever carries its frames.
//!
//! ```text
//!   Collab ──ClientFrame──► TransportHandle.outgoing ──► (WebSocket task | test)
//!   Collab ◄─TransportEvent─ TransportHandle.events ◄── (WebSocket task | test)
//! ```
//!
//! Sending never awaits: a full queue is a transport failure the caller logs,
//! and the next full resync repairs whatever was lost.

use tokio::sync::mpsc;

use crate::protocol::{ClientFrame, RelayFrame};

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(RelayFrame),
    Disconnected,
    Error(String),
}

/// Session side of a connection.
#[derive(Debug)]
pub struct TransportHandle {
    outgoing: mpsc::Sender<ClientFrame>,
    events: mpsc::Receiver<TransportEvent>,
}

/// Far side of an in-memory connection, used by tests and embedders that
/// bring their own carrier.
#[derive(Debug)]
pub struct TransportRemote {
    pub outgoing: mpsc::Receiver<ClientFrame>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl TransportHandle {
    /// Wrap channels driven by a carrier task.
    pub fn new(
        outgoing: mpsc::Sender<ClientFrame>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outgoing, events }
    }

    /// Connected in-memory pair with `capacity` buffered items per direction.
    pub fn channel(capacity: usize) -> (TransportHandle, TransportRemote) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (evt_tx, evt_rx) = mpsc::channel(capacity);
        (
            TransportHandle::new(out_tx, evt_rx),
            TransportRemote {
                outgoing: out_rx,
                events: evt_tx,
            },
        )
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.outgoing.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    /// Next connection event. `None` once the carrier is gone.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Stop accepting events; frames already queued are still flushed.
    pub fn close(&mut self) {
        self.events.close();
    }
}

impl TransportRemote {
    /// Deliver a relay frame to the session.
    pub async fn deliver(&self, frame: RelayFrame) -> Result<(), TransportError> {
        self.events
            .send(TransportEvent::Frame(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Pull the next frame the session sent, if one is queued.
    pub fn try_next_frame(&mut self) -> Option<ClientFrame> {
        self.outgoing.try_recv().ok()
    }

    /// Drain every queued frame.
    pub fn drain_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outgoing.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ConnectFailed(String),
    QueueFull,
    ConnectionClosed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "Connect failed: {e}"),
            Self::QueueFull => write!(f, "Outgoing queue full"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}
