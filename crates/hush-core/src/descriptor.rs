//! Connection descriptor handed to a remote signer out of band.
//!
//! `hushconnect://<public-id-hex>?relay=<url>&relay=<url>&secret=<s>&name=<n>&url=<origin>&image=<icon>`

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hush_crypto::PublicId;

pub const DESCRIPTOR_SCHEME: &str = "hushconnect";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid descriptor uri: {0}")]
    InvalidUri(String),

    #[error("unexpected scheme {0:?}")]
    WrongScheme(String),

    #[error("descriptor public id is not 64 hex characters")]
    InvalidPublicId,

    #[error("descriptor lists no relays")]
    MissingRelay,

    #[error("invalid relay url {0:?}")]
    InvalidRelay(String),

    #[error("descriptor carries no secret")]
    MissingSecret,
}

/// Caller metadata shown by the signer when asking the user to approve.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// The client's ephemeral public id.
    pub public_id: PublicId,
    pub relays: Vec<String>,
    pub secret: String,
    pub metadata: SignerMetadata,
}

impl ConnectionDescriptor {
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.relays.is_empty() {
            return Err(DescriptorError::MissingRelay);
        }
        for relay in &self.relays {
            Url::parse(relay).map_err(|_| DescriptorError::InvalidRelay(relay.clone()))?;
        }
        if self.secret.is_empty() {
            return Err(DescriptorError::MissingSecret);
        }
        Ok(())
    }

    pub fn to_uri(&self) -> String {
        let mut out = format!("{DESCRIPTOR_SCHEME}://{}", self.public_id.to_hex());
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        query.append_pair("secret", &self.secret);
        if let Some(name) = &self.metadata.name {
            query.append_pair("name", name);
        }
        if let Some(url) = &self.metadata.url {
            query.append_pair("url", url);
        }
        if let Some(image) = &self.metadata.image {
            query.append_pair("image", image);
        }
        out.push('?');
        out.push_str(&query.finish());
        out
    }

    pub fn parse(uri: &str) -> Result<Self, DescriptorError> {
        let parsed = Url::parse(uri.trim()).map_err(|e| DescriptorError::InvalidUri(e.to_string()))?;
        if parsed.scheme() != DESCRIPTOR_SCHEME {
            return Err(DescriptorError::WrongScheme(parsed.scheme().to_string()));
        }

        let authority = parsed.host_str().unwrap_or_default();
        if authority.len() != 64 {
            return Err(DescriptorError::InvalidPublicId);
        }
        let public_id: PublicId = authority.parse().map_err(|_| DescriptorError::InvalidPublicId)?;

        let mut relays = Vec::new();
        let mut secret = None;
        let mut metadata = SignerMetadata::default();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "relay" => relays.push(value.into_owned()),
                "secret" => secret = Some(value.into_owned()),
                "name" => metadata.name = Some(value.into_owned()),
                "url" => metadata.url = Some(value.into_owned()),
                "image" => metadata.image = Some(value.into_owned()),
                _ => {}
            }
        }

        let descriptor = Self {
            public_id,
            relays,
            secret: secret.unwrap_or_default(),
            metadata,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl std::str::FromStr for ConnectionDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
