//! hush core - delegated signing and per-channel key distribution.
//!
//! This crate implements:
//! - Remote signer sessions (client side) and the custodian responder
//! - Connection descriptors and the signer wire protocol
//! - Channel key management: creation, wrapping, distribution, rotation
//! - The key request ledger and its holder-side responder
//! - Persistent storage abstraction and in-memory key caches

#![forbid(unsafe_code)]

// Remote signing
pub mod signer;
pub mod custodian;
pub mod descriptor;
pub mod protocol;

// Key distribution
pub mod channel_keys;
pub mod key_requests;

// Infrastructure
pub mod store;
pub mod cache;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;

pub use channel_keys::{ChannelKeyManager, DistributionReport, MessageView};
pub use errors::{CoreError, KeyError, LedgerError, SignerError};
pub use key_requests::{KeyRequestLedger, KeyRequestResponder};
pub use signer::{RemoteSignerSession, SignerConfig, SignerState};
pub use store::{InMemoryKeyStore, KeyStore};
