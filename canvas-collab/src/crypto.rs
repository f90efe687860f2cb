//! Room key material and payload encryption.
//!
//! Every room has one 128-bit AES-GCM key. It is generated on the client that
//! creates the room and travels only inside the share link fragment; neither
//! the relay nor the durable store ever sees it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const KEY_LEN: usize = 16;
pub const IV_LEN: usize = 12;
const ROOM_ID_BYTES: usize = 10;

/// Ciphertext plus the IV it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

/// Symmetric room key.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey([u8; KEY_LEN]);

impl RoomKey {
    /// Fresh random key for a new room.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the base64url form used in share links.
    pub fn from_link_str(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", b.len())))?;
        Ok(Self(key))
    }

    /// Base64url form, 22 characters.
    pub fn to_link_str(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Seal `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let iv: [u8; IV_LEN] = rand::random();
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;
        Ok(EncryptedPayload { ciphertext, iv })
    }

    /// Open a payload sealed with this key. Fails on tampering or a wrong key.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .decrypt(Nonce::from_slice(&payload.iv), payload.ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptFailed)
    }

    fn cipher(&self) -> Aes128Gcm {
        Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

/// Random room identifier: 20 lowercase hex characters.
pub fn generate_room_id() -> String {
    let bytes: [u8; ROOM_ID_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Crypto errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidKey(String),
    EncryptFailed,
    DecryptFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(e) => write!(f, "Invalid room key: {e}"),
            Self::EncryptFailed => write!(f, "Encryption failed"),
            Self::DecryptFailed => write!(f, "Decryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}
