//! Shared record types for key requests and time.

use std::fmt;
use std::str::FromStr;

use hush_crypto::PublicId;
use serde::{Deserialize, Serialize};

pub use hush_transport::unix_now;

/// Lifecycle of a key request. Moves to `Fulfilled` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRequestStatus {
    Pending,
    Fulfilled,
}

impl KeyRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
        }
    }
}

impl fmt::Display for KeyRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fulfilled" => Ok(Self::Fulfilled),
            other => Err(format!("unknown key request status: {other}")),
        }
    }
}

/// A principal asking holders to wrap a resource key for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub id: String,
    pub resource_id: String,
    pub requester_public_id: PublicId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_display_name: Option<String>,
    pub status: KeyRequestStatus,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<u64>,
}

impl KeyRequest {
    pub fn new_pending(
        resource_id: impl Into<String>,
        requester: PublicId,
        display_name: Option<String>,
        now: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            requester_public_id: requester,
            requester_display_name: display_name,
            status: KeyRequestStatus::Pending,
            created_at: now,
            fulfilled_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == KeyRequestStatus::Pending
    }

    pub fn view(&self) -> KeyRequestView {
        KeyRequestView {
            id: self.id.clone(),
            resource_id: self.resource_id.clone(),
            requester_public_id: self.requester_public_id,
            requester_display_name: self.requester_display_name.clone(),
            status: self.status,
        }
    }
}

/// List-endpoint projection of a [`KeyRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequestView {
    pub id: String,
    pub resource_id: String,
    pub requester_public_id: PublicId,
    pub requester_display_name: Option<String>,
    pub status: KeyRequestStatus,
}
