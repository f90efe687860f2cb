//! WebSocket carrier for a session's transport.
//!
//! Spawns one writer task (outgoing channel → socket) and one reader task
//! (socket → event channel). Frames are bincode on binary WebSocket messages.
//! The tasks end when either side closes; the session sees
//! `TransportEvent::Disconnected` and keeps its room until told otherwise.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientFrame, RelayFrame};
use crate::transport::{TransportError, TransportEvent, TransportHandle};

/// Frames buffered per direction.
pub const CHANNEL_CAPACITY: usize = 256;

/// Connect to a relay and hand back the session side of the connection.
pub async fn connect(url: &str) -> Result<TransportHandle, TransportError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    log::info!("Connected to relay at {url}");

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);
    let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

    // Writer task: forward outgoing channel to WebSocket
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let data = match frame.encode() {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Dropping unencodable frame: {e}");
                    continue;
                }
            };
            if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    // Reader task: process incoming WebSocket messages
    tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Binary(data)) => match RelayFrame::decode(&data) {
                    Ok(frame) => {
                        if evt_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => log::debug!("Ignoring undecodable relay frame: {e}"),
                },
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    let _ = evt_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                _ => {}
            }
        }

        // Connection lost
        let _ = evt_tx.send(TransportEvent::Disconnected).await;
    });

    Ok(TransportHandle::new(out_tx, evt_rx))
}
