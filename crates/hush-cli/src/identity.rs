//! Local identity persistence
//!
//! The identity secret lives in a JSON file readable only by its owner. It is
//! written atomically through a temp file and never leaves this module except
//! as an `Identity` handle.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hush_crypto::hash::sha256_hex;
use hush_crypto::identity::IdentitySecret;
use hush_crypto::{Identity, PublicId};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No identity at {0}; run `hush identity generate`")]
    NotFound(PathBuf),

    #[error("An identity already exists at {0}; pass --force to replace it")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),
}

/// Public view of the local identity
#[derive(Debug, Clone, Serialize)]
pub struct IdentityInfo {
    pub public_id: PublicId,
    /// SHA-256 of the signing public key, hex
    pub fingerprint: String,
    pub created_at: SystemTime,
    pub path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    version: u32,
    /// `IdentitySecret` hex: key agreement secret then signing seed
    secret: String,
    /// RFC3339
    created_at: String,
}

impl StoredIdentity {
    const CURRENT_VERSION: u32 = 1;

    fn new(secret: &IdentitySecret, created_at: SystemTime) -> Self {
        let datetime: chrono::DateTime<chrono::Utc> = created_at.into();
        Self {
            version: Self::CURRENT_VERSION,
            secret: secret.to_hex(),
            created_at: datetime.to_rfc3339(),
        }
    }

    fn parse_created_at(&self) -> Result<SystemTime, IdentityError> {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc).into())
            .map_err(|e| IdentityError::Serialization(format!("Invalid timestamp: {e}")))
    }
}

/// Identity file at a fixed path.
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Generate and persist a new identity. Refuses to overwrite unless
    /// `force` is set.
    pub fn generate(&self, force: bool) -> Result<(Identity, IdentityInfo), IdentityError> {
        if self.exists() && !force {
            return Err(IdentityError::AlreadyExists(self.path.clone()));
        }
        let identity = Identity::generate();
        let created_at = SystemTime::now();
        self.store(&StoredIdentity::new(&identity.export_secret(), created_at))?;

        tracing::info!(public_id = %identity.public_id().short(), "generated new identity");
        let info = self.info(&identity, created_at);
        Ok((identity, info))
    }

    pub fn load(&self) -> Result<(Identity, IdentityInfo), IdentityError> {
        if !self.exists() {
            return Err(IdentityError::NotFound(self.path.clone()));
        }
        let contents = fs::read_to_string(&self.path)?;
        let stored: StoredIdentity =
            serde_json::from_str(&contents).map_err(|e| IdentityError::Serialization(e.to_string()))?;
        if stored.version != StoredIdentity::CURRENT_VERSION {
            return Err(IdentityError::InvalidKeyData(format!(
                "unsupported identity file version {}",
                stored.version
            )));
        }

        let secret = IdentitySecret::from_hex(&stored.secret)
            .map_err(|e| IdentityError::InvalidKeyData(e.to_string()))?;
        let identity = Identity::from_secret(&secret);
        let created_at = stored.parse_created_at()?;

        tracing::debug!(public_id = %identity.public_id().short(), "loaded identity");
        let info = self.info(&identity, created_at);
        Ok((identity, info))
    }

    /// Load the identity, generating one on first use.
    pub fn load_or_generate(&self) -> Result<(Identity, IdentityInfo), IdentityError> {
        if self.exists() {
            self.load()
        } else {
            self.generate(false)
        }
    }

    fn info(&self, identity: &Identity, created_at: SystemTime) -> IdentityInfo {
        IdentityInfo {
            public_id: identity.public_id(),
            fingerprint: sha256_hex(&identity.sign_pub()),
            created_at,
            path: self.path.clone(),
        }
    }

    fn store(&self, stored: &StoredIdentity) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json =
            serde_json::to_string_pretty(stored).map_err(|e| IdentityError::Serialization(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
