//! Binding notifications and lease lifetimes.
//!
//! The pools never persist lease records themselves. Every state change a
//! lease record cares about (allocation, renewal, reclamation on expiry) is
//! reported to a [`BindingStore`], which owns durable storage.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::range::Range;

/// Preferred and valid lifetimes of a lease, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetimes {
    pub preferred: u32,
    pub valid: u32,
}

impl Lifetimes {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `preferred > valid`.
    pub fn new(preferred: u32, valid: u32) -> Result<Self> {
        if preferred > valid {
            return Err(Error::InvalidConfig(format!(
                "preferred lifetime {} exceeds valid lifetime {}",
                preferred, valid
            )));
        }
        Ok(Self { preferred, valid })
    }

    pub fn preferred_ms(&self) -> u64 {
        u64::from(self.preferred) * 1000
    }

    pub fn valid_ms(&self) -> u64 {
        u64::from(self.valid) * 1000
    }
}

/// What happened to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingEventKind {
    /// The address was handed out by `allocate`.
    Allocated,
    /// A pending expiration was replaced by a later one.
    Renewed,
    /// The lease expired and the address went back to the pool.
    Expired,
}

/// A state change reported to the [`BindingStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingEvent {
    pub address: IpAddr,
    /// Set for delegated prefixes, `None` for single addresses.
    pub prefix_length: Option<u8>,
    pub kind: BindingEventKind,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub at: DateTime<Utc>,
}

impl BindingEvent {
    pub fn new(
        address: IpAddr,
        prefix_length: Option<u8>,
        kind: BindingEventKind,
        lifetimes: Lifetimes,
    ) -> Self {
        Self {
            address,
            prefix_length,
            kind,
            preferred_lifetime: lifetimes.preferred,
            valid_lifetime: lifetimes.valid,
            at: Utc::now(),
        }
    }
}

/// The persistence collaborator.
///
/// Calls are made while the pool lock is held, so events for one address
/// arrive in the order the pool applied them. Implementations must not
/// block or call back into the pool; queue the work instead.
pub trait BindingStore: Send + Sync {
    fn notify(&self, event: BindingEvent);

    /// Addresses in `range` whose leases the store knows to be expired.
    ///
    /// Consulted only by the forced reclamation sweep when a pool is
    /// exhausted.
    fn confirmed_expired(&self, range: &Range) -> Vec<IpAddr> {
        let _ = range;
        Vec::new()
    }
}

/// A store that discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBindingStore;

impl BindingStore for NullBindingStore {
    fn notify(&self, _event: BindingEvent) {}
}
