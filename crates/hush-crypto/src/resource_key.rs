//! Per-resource symmetric keys and channel message sealing.
//!
//! A `ResourceKey` is one rotation of a channel's key. Message ciphertext
//! names the key version it was sealed under so holders of several versions
//! pick the right one.
//!
//! Message wire format (base64): `"hc" || key_version(u32 be) || nonce(12) || ciphertext+tag`,
//! with the 6-byte header and the resource id bound as associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::utils::{constant_time_compare_array, decode_b64, encode_b64};

const MESSAGE_MAGIC: &[u8; 2] = b"hc";
const MESSAGE_HEADER_LEN: usize = 2 + 4;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message ciphertext")]
    Malformed,
    #[error("unsupported message format")]
    UnsupportedFormat,
    #[error("message sealed under key version {found}, have {expected}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("message failed to authenticate")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// One version of a resource's symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ResourceKey {
    #[zeroize(skip)]
    resource_id: String,
    #[zeroize(skip)]
    version: u32,
    bytes: [u8; 32],
}

impl ResourceKey {
    pub const LEN: usize = 32;

    pub fn generate(resource_id: impl Into<String>, version: u32) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(resource_id, version, bytes)
    }

    pub fn from_bytes(resource_id: impl Into<String>, version: u32, bytes: [u8; 32]) -> Self {
        Self {
            resource_id: resource_id.into(),
            version,
            bytes,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Same resource, same version, same key material.
    pub fn same_key(&self, other: &ResourceKey) -> bool {
        self.resource_id == other.resource_id
            && self.version == other.version
            && constant_time_compare_array(&self.bytes, &other.bytes)
    }

    /// Seal a channel message under this key version.
    pub fn seal_message(&self, plaintext: &[u8]) -> Result<String, MessageError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let header = message_header(self.version);
        let aad = message_aad(&header, &self.resource_id);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        let ct = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| MessageError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(MESSAGE_HEADER_LEN + NONCE_LEN + ct.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(encode_b64(&out))
    }

    /// Open a message sealed by [`seal_message`](Self::seal_message).
    pub fn open_message(&self, ciphertext: &str) -> Result<Vec<u8>, MessageError> {
        let parsed = ParsedMessage::parse(ciphertext)?;
        if parsed.key_version != self.version {
            return Err(MessageError::VersionMismatch {
                expected: self.version,
                found: parsed.key_version,
            });
        }

        let header = message_header(parsed.key_version);
        let aad = message_aad(&header, &self.resource_id);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        cipher
            .decrypt(
                Nonce::from_slice(&parsed.nonce),
                Payload {
                    msg: &parsed.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| MessageError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceKey")
            .field("resource_id", &self.resource_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Read the key version a message was sealed under without decrypting it.
pub fn message_key_version(ciphertext: &str) -> Result<u32, MessageError> {
    ParsedMessage::parse(ciphertext).map(|m| m.key_version)
}

struct ParsedMessage {
    key_version: u32,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl ParsedMessage {
    fn parse(ciphertext: &str) -> Result<Self, MessageError> {
        let raw = decode_b64(ciphertext).ok_or(MessageError::Malformed)?;
        if raw.len() < MESSAGE_MAGIC.len() {
            return Err(MessageError::Malformed);
        }
        if &raw[..2] != MESSAGE_MAGIC {
            return Err(MessageError::UnsupportedFormat);
        }
        if raw.len() < MESSAGE_HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(MessageError::Malformed);
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&raw[2..MESSAGE_HEADER_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[MESSAGE_HEADER_LEN..MESSAGE_HEADER_LEN + NONCE_LEN]);

        Ok(Self {
            key_version: u32::from_be_bytes(version),
            nonce,
            ciphertext: raw[MESSAGE_HEADER_LEN + NONCE_LEN..].to_vec(),
        })
    }
}

fn message_header(version: u32) -> [u8; MESSAGE_HEADER_LEN] {
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    header[..2].copy_from_slice(MESSAGE_MAGIC);
    header[2..].copy_from_slice(&version.to_be_bytes());
    header
}

fn message_aad(header: &[u8], resource_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header.len() + resource_id.len());
    aad.extend_from_slice(header);
    aad.extend_from_slice(resource_id.as_bytes());
    aad
}
