//! Conversation cipher.
//!
//! Either side of a principal pair derives the same symmetric key from its
//! own secret and the other side's public id (X25519 + HKDF-SHA256). Payloads
//! are sealed with ChaCha20Poly1305 and carry a version tag and the sender's
//! public id, both bound as associated data.
//!
//! Wire format (base64): `version(1) || sender_id(32) || nonce(12) || ciphertext+tag`

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::{Identity, PublicId};
use crate::utils::{constant_time_compare_array, decode_b64, encode_b64};

/// Current conversation payload version.
pub const CIPHER_VERSION_V1: u8 = 1;

const HEADER_LEN: usize = 1 + PublicId::LEN;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

const KDF_SALT_V1: &[u8] = b"hush_conv_salt_v1";
const KDF_INFO_V1: &[u8] = b"hush_conv_key_v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
    #[error("unsupported cipher version {0}")]
    UnsupportedVersion(u8),
    #[error("sender is not a party to this conversation")]
    SenderMismatch,
    #[error("ciphertext failed to authenticate")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

impl CipherError {
    /// Format and version problems, as opposed to authentication failures.
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::UnsupportedVersion(_))
    }
}

/// Symmetric key shared by one principal pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey {
    key: [u8; 32],
    #[zeroize(skip)]
    local: PublicId,
    #[zeroize(skip)]
    remote: PublicId,
}

impl ConversationKey {
    pub fn local(&self) -> &PublicId {
        &self.local
    }

    pub fn remote(&self) -> &PublicId {
        &self.remote
    }

    /// Constant-time comparison of the key material only.
    pub fn same_secret(&self, other: &ConversationKey) -> bool {
        constant_time_compare_array(&self.key, &other.key)
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationKey")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Derive the conversation key between `local` and `remote`.
///
/// `derive_key(a, b.public_id())` and `derive_key(b, a.public_id())` yield the
/// same key material.
pub fn derive_key(local: &Identity, remote: &PublicId) -> ConversationKey {
    let mut shared = local.key_exchange(remote);
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT_V1), &shared);
    let mut key = [0u8; 32];
    // 32 bytes is well under the HKDF-SHA256 output limit
    hk.expand(KDF_INFO_V1, &mut key)
        .expect("32-byte HKDF output is always valid");
    shared.zeroize();

    ConversationKey {
        key,
        local: local.public_id(),
        remote: *remote,
    }
}

/// Seal `plaintext` as the local side of `key`.
pub fn encrypt(plaintext: &[u8], key: &ConversationKey) -> Result<String, CipherError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut header = [0u8; HEADER_LEN];
    header[0] = CIPHER_VERSION_V1;
    header[1..].copy_from_slice(key.local.as_bytes());

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.key));
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ct.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(encode_b64(&out))
}

/// Result of a successful `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub plaintext: Vec<u8>,
    pub sender: PublicId,
}

/// Strict decryption with a typed error.
pub fn open(ciphertext: &str, key: &ConversationKey) -> Result<Opened, CipherError> {
    let raw = decode_b64(ciphertext).ok_or(CipherError::Malformed("not base64"))?;
    if raw.is_empty() {
        return Err(CipherError::Malformed("empty"));
    }
    if raw[0] != CIPHER_VERSION_V1 {
        return Err(CipherError::UnsupportedVersion(raw[0]));
    }
    if raw.len() < MIN_LEN {
        return Err(CipherError::Malformed("truncated"));
    }

    let (header, rest) = raw.split_at(HEADER_LEN);
    let (nonce, ct) = rest.split_at(NONCE_LEN);
    let sender = PublicId::from_slice(&header[1..]).map_err(|_| CipherError::Malformed("sender"))?;
    if sender != key.local && sender != key.remote {
        return Err(CipherError::SenderMismatch);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: header })
        .map_err(|_| CipherError::AuthenticationFailed)?;

    Ok(Opened { plaintext, sender })
}

/// Outcome of a lenient decryption. Never an error: callers check
/// `authenticated` and degrade to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    pub sender: Option<PublicId>,
    pub authenticated: bool,
    pub failure: Option<CipherError>,
}

pub fn decrypt(ciphertext: &str, key: &ConversationKey) -> Decrypted {
    match open(ciphertext, key) {
        Ok(opened) => Decrypted {
            plaintext: opened.plaintext,
            sender: Some(opened.sender),
            authenticated: true,
            failure: None,
        },
        Err(e) => Decrypted {
            plaintext: Vec::new(),
            sender: None,
            authenticated: false,
            failure: Some(e),
        },
    }
}
