//! Cryptographic building blocks for hush.
//!
//! - `identity`: X25519 key agreement + Ed25519 signing keypairs and public ids
//! - `conversation`: pairwise conversation keys and versioned AEAD payloads
//! - `resource_key`: per-channel symmetric keys and message sealing
//! - `wrap`: wrapping a resource key for one recipient

#![forbid(unsafe_code)]

pub mod hash;
pub mod transcript;
pub mod identity;

pub mod conversation;
pub mod resource_key;
pub mod wrap;

pub mod utils;

#[cfg(test)]
mod proptests;

pub use conversation::{ConversationKey, Decrypted};
pub use identity::{Identity, PublicId};
pub use resource_key::ResourceKey;
pub use wrap::WrappedKey;
