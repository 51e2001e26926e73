//! Identity module for principal keypair management.
//!
//! A principal is addressed by its X25519 public key (`PublicId`). The
//! private half is held by exactly one process inside an `Identity`, which
//! also carries an Ed25519 key for signing on the principal's behalf.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Error type for identity operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Stable public identifier of a principal: its X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicId([u8; 32]);

impl PublicId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdentityError::InvalidKeyLength {
            expected: Self::LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicId({})", self.short())
    }
}

impl FromStr for PublicId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| IdentityError::InvalidHex)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for PublicId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw secret material of an `Identity`, for persistence by its owner only.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IdentitySecret {
    pub kex: [u8; 32],
    pub sign: [u8; 32],
}

impl IdentitySecret {
    /// Hex form: `kex || sign`, 128 characters.
    pub fn to_hex(&self) -> String {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.kex);
        buf[32..].copy_from_slice(&self.sign);
        let out = hex::encode(buf);
        buf.zeroize();
        out
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let mut bytes = hex::decode(s.trim()).map_err(|_| IdentityError::InvalidHex)?;
        if bytes.len() != 64 {
            let got = bytes.len();
            bytes.zeroize();
            return Err(IdentityError::InvalidKeyLength { expected: 64, got });
        }
        let mut secret = Self {
            kex: [0u8; 32],
            sign: [0u8; 32],
        };
        secret.kex.copy_from_slice(&bytes[..32]);
        secret.sign.copy_from_slice(&bytes[32..]);
        bytes.zeroize();
        Ok(secret)
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentitySecret(<redacted>)")
    }
}

/// A principal's local secret handle.
///
/// `StaticSecret` and `SigningKey` zeroize themselves on drop.
#[derive(Clone)]
pub struct Identity {
    kex_key: StaticSecret,
    sign_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity using a secure random source.
    pub fn generate() -> Self {
        Self {
            kex_key: StaticSecret::random_from_rng(OsRng),
            sign_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: &IdentitySecret) -> Self {
        Self {
            kex_key: StaticSecret::from(secret.kex),
            sign_key: SigningKey::from_bytes(&secret.sign),
        }
    }

    pub fn export_secret(&self) -> IdentitySecret {
        IdentitySecret {
            kex: self.kex_key.to_bytes(),
            sign: self.sign_key.to_bytes(),
        }
    }

    pub fn public_id(&self) -> PublicId {
        PublicId(*X25519PublicKey::from(&self.kex_key).as_bytes())
    }

    /// Get the Ed25519 signing public key bytes.
    pub fn sign_pub(&self) -> [u8; 32] {
        self.sign_key.verifying_key().to_bytes()
    }

    /// Sign a message using Ed25519.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.sign_key.sign(message);
        signature.to_bytes()
    }

    /// X25519 Diffie-Hellman with a peer's public id.
    pub fn key_exchange(&self, peer: &PublicId) -> [u8; 32] {
        let peer_pub = X25519PublicKey::from(*peer.as_bytes());
        *self.kex_key.diffie_hellman(&peer_pub).as_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_id", &self.public_id())
            .finish_non_exhaustive()
    }
}

/// A principal known only by its public id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub public_id: PublicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Principal {
    pub fn new(public_id: PublicId) -> Self {
        Self {
            public_id,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Verify an Ed25519 signature.
pub fn verify_signature(
    pub_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pub_key).map_err(|_| IdentityError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify_strict(message, &sig)
        .map_err(|_| IdentityError::InvalidSignature)
}
