//! Wrapping a resource key for one recipient.
//!
//! The wrap is a conversation-cipher ciphertext between the wrapping
//! principal and the recipient. Its plaintext is
//! `key_version(u32 be) || key(32) || resource_id`, so a wrap moved onto the
//! wrong resource or version fails to unwrap.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::conversation::{self, CipherError, ConversationKey};
use crate::identity::{Identity, PublicId};
use crate::resource_key::ResourceKey;

/// Current wrap layout version.
pub const WRAPPER_VERSION_V1: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WrapError {
    #[error("wrapped key format error: {0}")]
    Format(String),
    #[error("unsupported wrapper version {0}")]
    UnsupportedVersion(u8),
    #[error("wrapped key failed to authenticate")]
    Authentication,
    #[error("wrapped key is addressed to {expected}, not this identity")]
    NotRecipient { expected: PublicId },
    #[error("wrapping failed: {0}")]
    Cipher(String),
}

impl WrapError {
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Format(_) | Self::UnsupportedVersion(_))
    }
}

/// A resource key sealed for one recipient. Stored by the coordinating
/// server; useless without the recipient's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub resource_id: String,
    pub recipient_public_id: PublicId,
    pub ciphertext: String,
    pub wrapper_version: u8,
    pub key_version: u32,
    pub wrapped_by_public_id: PublicId,
    /// Unix seconds.
    pub wrapped_at: u64,
}

/// Wrap `key` for `recipient` as `wrapper`.
pub fn wrap_for(
    key: &ResourceKey,
    recipient: &PublicId,
    wrapper: &Identity,
    now: u64,
) -> Result<WrappedKey, WrapError> {
    let conv = conversation::derive_key(wrapper, recipient);
    wrap_with(key, &conv, now)
}

/// Wrap using an already derived conversation key (wrapper = `conv.local()`).
pub fn wrap_with(key: &ResourceKey, conv: &ConversationKey, now: u64) -> Result<WrappedKey, WrapError> {
    let mut payload = encode_payload(key);
    let sealed = conversation::encrypt(&payload, conv);
    payload.zeroize();
    let ciphertext = sealed.map_err(|e| WrapError::Cipher(e.to_string()))?;

    Ok(WrappedKey {
        resource_id: key.resource_id().to_string(),
        recipient_public_id: *conv.remote(),
        ciphertext,
        wrapper_version: WRAPPER_VERSION_V1,
        key_version: key.version(),
        wrapped_by_public_id: *conv.local(),
        wrapped_at: now,
    })
}

/// Recover the resource key as the recipient.
pub fn unwrap(wrapped: &WrappedKey, recipient: &Identity) -> Result<ResourceKey, WrapError> {
    if recipient.public_id() != wrapped.recipient_public_id {
        return Err(WrapError::NotRecipient {
            expected: wrapped.recipient_public_id,
        });
    }
    let conv = conversation::derive_key(recipient, &wrapped.wrapped_by_public_id);
    unwrap_with(wrapped, &conv)
}

/// Unwrap with a conversation key between the recipient (local) and the
/// wrapping principal (remote).
pub fn unwrap_with(wrapped: &WrappedKey, conv: &ConversationKey) -> Result<ResourceKey, WrapError> {
    if wrapped.wrapper_version != WRAPPER_VERSION_V1 {
        return Err(WrapError::UnsupportedVersion(wrapped.wrapper_version));
    }
    if *conv.local() != wrapped.recipient_public_id {
        return Err(WrapError::NotRecipient {
            expected: wrapped.recipient_public_id,
        });
    }

    let opened = conversation::open(&wrapped.ciphertext, conv).map_err(|e| match e {
        CipherError::Malformed(what) => WrapError::Format(what.to_string()),
        CipherError::UnsupportedVersion(v) => WrapError::UnsupportedVersion(v),
        CipherError::SenderMismatch | CipherError::AuthenticationFailed => {
            WrapError::Authentication
        }
        CipherError::EncryptionFailed => WrapError::Cipher(e.to_string()),
    })?;
    if opened.sender != wrapped.wrapped_by_public_id {
        return Err(WrapError::Authentication);
    }

    let mut payload = opened.plaintext;
    let decoded = decode_payload(&payload, wrapped);
    payload.zeroize();
    decoded
}

fn encode_payload(key: &ResourceKey) -> Vec<u8> {
    let rid = key.resource_id().as_bytes();
    let mut out = Vec::with_capacity(4 + ResourceKey::LEN + rid.len());
    out.extend_from_slice(&key.version().to_be_bytes());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(rid);
    out
}

fn decode_payload(payload: &[u8], wrapped: &WrappedKey) -> Result<ResourceKey, WrapError> {
    if payload.len() < 4 + ResourceKey::LEN {
        return Err(WrapError::Format("payload too short".into()));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&payload[..4]);
    let version = u32::from_be_bytes(version);
    if version != wrapped.key_version {
        return Err(WrapError::Format(format!(
            "payload key version {version} does not match record version {}",
            wrapped.key_version
        )));
    }
    if &payload[4 + ResourceKey::LEN..] != wrapped.resource_id.as_bytes() {
        return Err(WrapError::Format("payload resource id does not match record".into()));
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&payload[4..4 + ResourceKey::LEN]);
    let key = ResourceKey::from_bytes(wrapped.resource_id.clone(), version, bytes);
    bytes.zeroize();
    Ok(key)
}
