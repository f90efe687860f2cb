//! Wire formats for room traffic.
//!
//! Two layers travel over the relay connection:
//!
//! ```text
//! ┌──────────────────────── ClientFrame / RelayFrame (cleartext, bincode) ─┐
//! │ room_id │ volatile │ EncryptedPayload { iv: 12 bytes, ciphertext }     │
//! └───────────────────────────────────────┬────────────────────────────────┘
//!                                         │ AES-GCM with the room key
//!                                         ▼
//!                         WireMessage (bincode): kind tag + payload
//! ```
//!
//! The relay only ever sees the outer frame. The message kind lives inside the
//! ciphertext, so even the type of traffic is hidden from it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncryptedPayload;
use crate::element::{Element, ElementId, Point};
use crate::presence::UserIdleState;

/// Connection identity assigned by the relay.
pub type SocketId = Uuid;

/// Kinds of encrypted room messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Full scene sent to a newcomer; applied once per room
    SceneInit = 1,
    /// Full or partial scene; always reconciled
    SceneUpdate = 2,
    /// Cursor, button and selection of one peer
    Pointer = 3,
    /// Idle state of one peer
    Presence = 4,
}

/// Pressed state of the primary pointer button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointerButton {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerPayload {
    pub socket_id: SocketId,
    pub pointer: Point,
    pub button: PointerButton,
    pub selected_element_ids: Vec<ElementId>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub socket_id: SocketId,
    pub user_state: UserIdleState,
    pub username: Option<String>,
}

/// Plaintext of an encrypted room message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    SceneInit { elements: Vec<Element> },
    SceneUpdate { elements: Vec<Element> },
    Pointer(PointerPayload),
    Presence(PresencePayload),
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SceneInit { .. } => MessageKind::SceneInit,
            Self::SceneUpdate { .. } => MessageKind::SceneUpdate,
            Self::Pointer(_) => MessageKind::Pointer,
            Self::Presence(_) => MessageKind::Presence,
        }
    }

    /// Serialize to the plaintext that gets encrypted.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Parse a decrypted plaintext.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    JoinRoom {
        room_id: String,
    },
    /// Opaque payload for every other member of the room.
    ///
    /// Volatile frames may be dropped by the relay when a peer lags.
    Broadcast {
        room_id: String,
        volatile: bool,
        payload: EncryptedPayload,
    },
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayFrame {
    /// Connection accepted; carries the id the relay knows us by.
    InitRoom { socket_id: SocketId },
    /// We are the only member of the room we joined.
    FirstInRoom,
    /// Another peer joined our room.
    NewUser { socket_id: SocketId },
    /// Complete current membership of the room.
    RoomUserChange { socket_ids: Vec<SocketId> },
    /// Payload broadcast by another member.
    ClientBroadcast { payload: EncryptedPayload },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl RelayFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;

    #[test]
    fn test_scene_update_roundtrip() {
        let elements = vec![
            Element::new("a", ElementKind::Rectangle).with_bounds(0.0, 0.0, 4.0, 4.0),
            Element::new("b", ElementKind::Text { text: "hello".into() }),
        ];
        let msg = WireMessage::SceneUpdate { elements: elements.clone() };

        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind(), MessageKind::SceneUpdate);
        assert_eq!(decoded, WireMessage::SceneUpdate { elements });
    }

    #[test]
    fn test_pointer_payload_roundtrip() {
        let payload = PointerPayload {
            socket_id: Uuid::new_v4(),
            pointer: Point::new(12.5, -3.0),
            button: PointerButton::Down,
            selected_element_ids: vec!["a".into(), "b".into()],
            username: Some("Alice".into()),
        };
        let msg = WireMessage::Pointer(payload.clone());
        match WireMessage::decode(&msg.encode().unwrap()).unwrap() {
            WireMessage::Pointer(p) => assert_eq!(p, payload),
            other => panic!("Expected Pointer, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_relay_frames_roundtrip() {
        let id = Uuid::new_v4();
        let frames = vec![
            RelayFrame::InitRoom { socket_id: id },
            RelayFrame::FirstInRoom,
            RelayFrame::NewUser { socket_id: id },
            RelayFrame::RoomUserChange { socket_ids: vec![id, Uuid::new_v4()] },
        ];
        for frame in frames {
            assert_eq!(RelayFrame::decode(&frame.encode().unwrap()).unwrap(), frame);
        }
    }

    #[test]
    fn test_broadcast_frame_carries_payload_untouched() {
        let frame = ClientFrame::Broadcast {
            room_id: "abc".into(),
            volatile: true,
            payload: EncryptedPayload { ciphertext: vec![9; 64], iv: [7; 12] },
        };
        assert_eq!(ClientFrame::decode(&frame.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(WireMessage::decode(&garbage).is_err());
        assert!(RelayFrame::decode(&garbage).is_err());
    }

    #[test]
    fn test_message_kind_values() {
        assert_eq!(MessageKind::SceneInit as u8, 1);
        assert_eq!(MessageKind::SceneUpdate as u8, 2);
        assert_eq!(MessageKind::Pointer as u8, 3);
        assert_eq!(MessageKind::Presence as u8, 4);
    }
}
