//! Error types for hush core.
//!
//! Each component has its own enum; `CoreError` unifies them for callers that
//! drive several components (the CLI, the harness).
//!
//! The taxonomy callers rely on:
//! - transport failures are recovered by reconnecting and surface as connectivity state
//! - protocol noise (undecryptable or unparseable events) is logged and dropped
//! - authentication failures are distinct from "no key available"
//! - timeouts are retryable, cancellation is silent

use thiserror::Error;

use hush_crypto::conversation::CipherError;
use hush_crypto::resource_key::MessageError;
use hush_crypto::wrap::WrapError;
use hush_crypto::PublicId;
use hush_transport::TransportError;

use crate::descriptor::DescriptorError;
use crate::signer::SignerState;
use crate::store::StoreError;

/// Remote signer session errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("no connect response within the handshake window")]
    HandshakeTimeout,

    #[error("request {method} ({correlation_id}) timed out")]
    RequestTimeout { method: String, correlation_id: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState { expected: SignerState, actual: SignerState },

    #[error("remote signer returned an error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl SignerError {
    /// Cancellation is user-initiated and should not be reported.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HandshakeTimeout | Self::RequestTimeout { .. })
    }
}

/// Resource key management errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("no key available for resource {resource_id}{}", version_suffix(.version))]
    NoKeyAvailable {
        resource_id: String,
        version: Option<u32>,
    },

    #[error("resource {resource_id} already has a key")]
    AlreadyExists { resource_id: String },

    #[error("resource {resource_id} was rotated concurrently (expected version {expected:?})")]
    RotationConflict {
        resource_id: String,
        expected: Option<u32>,
    },

    #[error("{principal} is not authorized for resource {resource_id}")]
    NotAuthorized {
        resource_id: String,
        principal: PublicId,
    },

    #[error("wrap error: {0}")]
    Wrap(#[from] WrapError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn version_suffix(version: &Option<u32>) -> String {
    version.map(|v| format!(" (version {v})")).unwrap_or_default()
}

impl KeyError {
    pub fn is_no_key(&self) -> bool {
        matches!(self, Self::NoKeyAvailable { .. })
    }

    /// Ciphertext or wrap failed to authenticate, as opposed to a missing key.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::Wrap(WrapError::Authentication) | Self::Message(MessageError::AuthenticationFailed)
        )
    }
}

/// Key request ledger errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{requester} is not authorized for resource {resource_id}")]
    NotAuthorized {
        resource_id: String,
        requester: PublicId,
    },

    #[error("key request not found: {0}")]
    NotFound(String),

    #[error("invalid fulfillment: {0}")]
    InvalidFulfillment(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Unified error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl CoreError {
    /// Errors that should not produce user-visible messaging.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Signer(e) if e.is_cancelled())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Signer(e) => e.is_timeout() || matches!(e, SignerError::Transport(t) if t.is_connectivity()),
            Self::Transport(t) => t.is_connectivity(),
            Self::Key(KeyError::RotationConflict { .. }) => true,
            _ => false,
        }
    }
}
