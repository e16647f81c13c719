//! In-memory lease-backed coordination store fake.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ulid::Ulid;

use corral_core::coordination::{AcquireResult, CoordinationStore, RenewResult};
use corral_core::error::{Error, Result};

struct Lease {
    payload: Vec<u8>,
    token: String,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Default)]
struct StoreState {
    leases: HashMap<String, Lease>,
    renewals: u64,
    unavailable: bool,
}

/// An in-memory coordination store with TTL leases.
///
/// [`FakeCoordinationStore::invalidate_all`] simulates a store restart that
/// drops every session, which is the recovery scenario the presence
/// maintainer has to survive.
#[derive(Default)]
pub struct FakeCoordinationStore {
    state: Mutex<StoreState>,
}

impl FakeCoordinationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every lease, as a store restart would.
    pub fn invalidate_all(&self) {
        self.lock().leases.clear();
    }

    /// Number of successful renewals across all keys.
    #[must_use]
    pub fn renewal_count(&self) -> u64 {
        self.lock().renewals
    }

    /// Makes every subsequent call fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn check_available(state: &StoreState) -> Result<()> {
        if state.unavailable {
            return Err(Error::http("coordination store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for FakeCoordinationStore {
    async fn acquire(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<AcquireResult> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        if let Some(lease) = state.leases.get(key) {
            if lease.expires_at > now {
                return Ok(AcquireResult::Held {
                    holder: Some(lease.token.clone()),
                });
            }
        }
        let token = Ulid::new().to_string();
        state.leases.insert(
            key.to_string(),
            Lease {
                payload: payload.to_vec(),
                token: token.clone(),
                ttl,
                expires_at: now + ttl,
            },
        );
        Ok(AcquireResult::Acquired {
            lease_token: token,
            ttl,
        })
    }

    async fn renew(&self, key: &str, lease_token: &str) -> Result<RenewResult> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        let Some(lease) = state.leases.get_mut(key) else {
            return Ok(RenewResult::Lost);
        };
        if lease.token != lease_token {
            return Ok(RenewResult::InvalidToken);
        }
        if lease.expires_at <= now {
            state.leases.remove(key);
            return Ok(RenewResult::Lost);
        }
        lease.expires_at = now + lease.ttl;
        let ttl = lease.ttl;
        state.renewals += 1;
        Ok(RenewResult::Renewed { ttl })
    }

    async fn release(&self, key: &str, lease_token: &str) -> Result<bool> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let owned = state
            .leases
            .get(key)
            .is_some_and(|lease| lease.token == lease_token);
        if owned {
            state.leases.remove(key);
        }
        Ok(owned)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self.lock();
        Self::check_available(&state)?;
        let now = Instant::now();
        Ok(state
            .leases
            .get(key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.payload.clone()))
    }
}
