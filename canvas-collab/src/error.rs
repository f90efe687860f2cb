//! Error taxonomy of the collaboration layer.
//!
//! Only `NoActiveRoom` aborts an operation outright. Transport, persistence
//! and asset failures are logged by the session and retried on the next
//! natural trigger (mutation, resync tick, presence tick).

use crate::crypto::CryptoError;
use crate::protocol::ProtocolError;
use crate::storage::StoreError;
use crate::transport::TransportError;

/// Collaboration errors.
#[derive(Debug)]
pub enum CollabError {
    /// Operation needs an open room and there is none.
    NoActiveRoom,
    Transport(TransportError),
    Persistence(StoreError),
    Crypto(CryptoError),
    Protocol(ProtocolError),
    /// Upload batch larger than the configured cap; nothing was uploaded.
    FileBatchTooLarge { size: usize, max: usize },
    InvalidRoomLink(String),
}

impl std::fmt::Display for CollabError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoActiveRoom => write!(f, "No active room"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
            Self::Persistence(e) => write!(f, "Persistence error: {e}"),
            Self::Crypto(e) => write!(f, "Crypto error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::FileBatchTooLarge { size, max } => {
                write!(f, "File batch of {size} bytes exceeds limit of {max} bytes")
            }
            Self::InvalidRoomLink(link) => write!(f, "Invalid room link: {link}"),
        }
    }
}

impl std::error::Error for CollabError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CollabError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e)
    }
}

impl From<CryptoError> for CollabError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<ProtocolError> for CollabError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
