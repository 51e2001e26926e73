//! hush CLI
//!
//! This crate provides a command-line interface for:
//! - Managing the local identity
//! - Producing and inspecting remote signer connection descriptors
//! - Administering channel keys (create, grant, distribute, rotate)
//! - Working the key request ledger

pub mod channel;
pub mod cli;
pub mod config;
pub mod identity;
pub mod output;
pub mod requests;
pub mod signer;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use hush_core::descriptor::DescriptorError;
use hush_core::{CoreError, KeyError, LedgerError, SignerError};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Authentication failed - a wrap, message or response did not verify
/// - 3: Timeout - handshake or request window elapsed
/// - 4: Connection failed - relays unreachable
/// - 5: Invalid input - bad arguments, descriptor or ciphertext
/// - 6: Key unavailable - this identity holds no key for the resource (yet)
/// - 7: Permission denied - principal not authorized for the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    KeyUnavailable = 6,
    PermissionDenied = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::KeyUnavailable => "KEY_UNAVAILABLE",
            ExitCode::PermissionDenied => "PERMISSION_DENIED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::AuthenticationFailed => "Authentication or verification failed",
            ExitCode::Timeout => "Operation timed out",
            ExitCode::ConnectionFailed => "Could not reach any relay",
            ExitCode::InvalidInput => "Invalid arguments or data provided",
            ExitCode::KeyUnavailable => "No key available for this resource",
            ExitCode::PermissionDenied => "Principal is not authorized for this resource",
        }
    }

    /// Classify an error surfaced by a command.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<CoreError>() {
            return Self::from_core(e);
        }
        if let Some(e) = err.downcast_ref::<SignerError>() {
            return Self::from_signer(e);
        }
        if let Some(e) = err.downcast_ref::<KeyError>() {
            return Self::from_key(e);
        }
        if let Some(e) = err.downcast_ref::<LedgerError>() {
            return Self::from_ledger(e);
        }
        if err.downcast_ref::<DescriptorError>().is_some()
            || err.downcast_ref::<config::ConfigError>().is_some()
        {
            return Self::InvalidInput;
        }
        Self::GeneralError
    }

    fn from_core(err: &CoreError) -> Self {
        match err {
            CoreError::Signer(e) => Self::from_signer(e),
            CoreError::Key(e) => Self::from_key(e),
            CoreError::Ledger(e) => Self::from_ledger(e),
            CoreError::Transport(_) => Self::ConnectionFailed,
            CoreError::Descriptor(_) => Self::InvalidInput,
            CoreError::Store(_) => Self::GeneralError,
        }
    }

    fn from_signer(err: &SignerError) -> Self {
        match err {
            e if e.is_timeout() => Self::Timeout,
            SignerError::Transport(_) => Self::ConnectionFailed,
            SignerError::Descriptor(_) => Self::InvalidInput,
            SignerError::Cipher(_) => Self::AuthenticationFailed,
            _ => Self::GeneralError,
        }
    }

    fn from_key(err: &KeyError) -> Self {
        match err {
            KeyError::NoKeyAvailable { .. } => Self::KeyUnavailable,
            KeyError::NotAuthorized { .. } => Self::PermissionDenied,
            KeyError::AlreadyExists { .. } => Self::InvalidInput,
            e if e.is_authentication() => Self::AuthenticationFailed,
            KeyError::Message(_) | KeyError::Wrap(_) => Self::InvalidInput,
            _ => Self::GeneralError,
        }
    }

    fn from_ledger(err: &LedgerError) -> Self {
        match err {
            LedgerError::NotAuthorized { .. } => Self::PermissionDenied,
            LedgerError::NotFound(_) | LedgerError::InvalidFulfillment(_) => Self::InvalidInput,
            LedgerError::Key(e) => Self::from_key(e),
            LedgerError::Store(_) => Self::GeneralError,
        }
    }
}
