//! Remote signer wire messages.
//!
//! Every signer event carries a conversation-cipher ciphertext whose
//! plaintext is one JSON `SignerMessage`. Requests set `method`/`params`,
//! responses echo the request `id` and set `result` or `error`.

use serde::{Deserialize, Serialize};

use hush_crypto::identity::{verify_signature, IdentityError};

/// Accepted in place of the secret in a connect response.
pub const ACK: &str = "ack";

pub mod methods {
    pub const PING: &str = "ping";
    pub const GET_PUBLIC_KEY: &str = "get_public_key";
    pub const SIGN_EVENT: &str = "sign_event";
    pub const ENCRYPT: &str = "encrypt";
    pub const DECRYPT: &str = "decrypt";
}

pub const PONG: &str = "pong";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignerMessage {
    pub fn request(id: impl Into<String>, method: &str, params: Vec<String>) -> Self {
        Self {
            id: id.into(),
            method: Some(method.to_string()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn result(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: None,
            params: Vec::new(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: None,
            params: Vec::new(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    pub fn to_json(&self) -> String {
        // a struct of strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Event content submitted for delegated signing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub created_at: u64,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&(self.kind, self.created_at, &self.tags, &self.content))
            .unwrap_or_default()
    }
}

/// A signed event returned by the remote signer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    #[serde(flatten)]
    pub event: UnsignedEvent,
    /// Hex Ed25519 verifying key.
    pub signer: String,
    /// Hex Ed25519 signature.
    pub sig: String,
}

impl SignedEvent {
    pub fn verify(&self) -> Result<(), IdentityError> {
        let signer = decode_fixed::<32>(&self.signer)?;
        let sig = decode_fixed::<64>(&self.sig)?;
        verify_signature(&signer, &self.event.signing_bytes(), &sig)
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], IdentityError> {
    let bytes = hex::decode(s).map_err(|_| IdentityError::InvalidHex)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyLength {
            expected: N,
            got: bytes.len(),
        })
}
