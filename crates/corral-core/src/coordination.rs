//! Lease-backed coordination store interface for cell presence.
//!
//! Presence is a named key holding the cell's advertisement, associated
//! with a time-bounded lease: the holder must renew before expiry or the
//! key disappears and another acquisition round begins. The trait is
//! deliberately lease-shaped rather than lock-shaped; the maintainer never
//! assumes it holds the key between calls.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auction::RootFsProviders;
use crate::error::Result;
use crate::identity::CellId;

/// The advertisement a cell publishes under its presence key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPresence {
    /// The cell identifier.
    pub cell_id: CellId,
    /// Address of the cell's HTTP surface.
    pub rep_address: String,
    /// Availability zone the cell runs in.
    pub zone: String,
    /// Root filesystems the cell can boot.
    pub root_fs_providers: RootFsProviders,
}

/// Returns the coordination-store key for a cell's presence.
#[must_use]
pub fn presence_key(cell_id: &CellId) -> String {
    format!("cells/{cell_id}")
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// The key was written and a lease granted.
    Acquired {
        /// Token that must be presented on renewal and release.
        lease_token: String,
        /// Duration until the lease expires.
        ttl: Duration,
    },
    /// Another holder owns the key.
    Held {
        /// Identifier of the current holder, if known.
        holder: Option<String>,
    },
}

impl AcquireResult {
    /// Returns the lease token when acquired.
    #[must_use]
    pub fn lease_token(&self) -> Option<&str> {
        match self {
            Self::Acquired { lease_token, .. } => Some(lease_token),
            Self::Held { .. } => None,
        }
    }
}

/// Result of a lease renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewResult {
    /// The lease was extended.
    Renewed {
        /// New duration until expiry.
        ttl: Duration,
    },
    /// The lease expired or the key was taken by another holder.
    Lost,
    /// The presented token never named a live lease.
    InvalidToken,
}

impl RenewResult {
    /// Returns true when the lease was extended.
    #[must_use]
    pub const fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

/// Lease-backed key-value coordination store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Attempts to write `payload` under `key` with a lease of `ttl`.
    async fn acquire(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<AcquireResult>;

    /// Renews the lease on `key`. Must be called before expiry.
    async fn renew(&self, key: &str, lease_token: &str) -> Result<RenewResult>;

    /// Releases the lease and deletes the key. Returns false when the lease
    /// was already gone.
    async fn release(&self, key: &str, lease_token: &str) -> Result<bool>;

    /// Reads the current payload under `key`, if any.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;
}
