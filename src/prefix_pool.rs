//! Prefix delegation pools.
//!
//! A [`PrefixBindingPool`] delegates fixed-length prefixes carved from an
//! IPv6 range. Only prefixes whose network address lies inside the range
//! and is aligned to the delegated length are handed out.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use primitive_types::U256;
use tracing::{debug, info, warn};

use crate::binding::{BindingStore, Lifetimes};
use crate::config::PrefixPoolConfig;
use crate::error::{Error, Result};
use crate::filter::LinkFilter;
use crate::pool::{BindingPool, PoolStats};
use crate::range::Range;
use crate::scheduler::ScheduleOutcome;
use crate::slots::{LeaseSlots, SlotMap};

/// An IPv6 prefix, `address/length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub address: Ipv6Addr,
    pub length: u8,
}

impl Prefix {
    pub fn new(address: Ipv6Addr, length: u8) -> Self {
        Self { address, length }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.length)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidRange(format!("'{}' is not an IPv6 prefix", s));
        let (address, length) = s.trim().split_once('/').ok_or_else(bad)?;
        let address: Ipv6Addr = address.parse().map_err(|_| bad())?;
        let length: u8 = length.parse().map_err(|_| bad())?;
        if length > 128 {
            return Err(bad());
        }
        Ok(Self { address, length })
    }
}

/// A pool of delegated prefixes of one length.
pub struct PrefixBindingPool {
    prefix_length: u8,
    lifetimes: Lifetimes,
    link_filter: Option<LinkFilter>,
    slots: LeaseSlots,
}

impl PrefixBindingPool {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the range is not IPv6, the length
    /// is not in `1..=128`, or the range holds no aligned prefix.
    pub fn new(
        range: Range,
        prefix_length: u8,
        lifetimes: Lifetimes,
        store: Arc<dyn BindingStore>,
    ) -> Result<Self> {
        let slots = LeaseSlots::new(SlotMap::prefixes(range, prefix_length)?, store)?;
        info!(
            "Prefix pool {} delegating /{} prefixes (preferred {}s, valid {}s)",
            range, prefix_length, lifetimes.preferred, lifetimes.valid
        );
        Ok(Self {
            prefix_length,
            lifetimes,
            link_filter: None,
            slots,
        })
    }

    pub fn from_config(config: &PrefixPoolConfig, store: Arc<dyn BindingStore>) -> Result<Self> {
        let pool = Self::new(config.range, config.prefix_length, config.lifetimes()?, store)?;
        Ok(pool.with_link_filter(config.link_filter.clone()))
    }

    pub fn with_link_filter(mut self, link_filter: Option<LinkFilter>) -> Self {
        self.link_filter = link_filter;
        self
    }

    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    fn check_prefix(&self, prefix: Prefix, operation: &str) -> Result<u128> {
        let address = IpAddr::V6(prefix.address);
        let slot = if prefix.length == self.prefix_length {
            self.slots.map().slot_of(address)
        } else {
            None
        };
        slot.ok_or_else(|| {
            warn!("{} of {} rejected: not a prefix of pool {}", operation, prefix, self);
            Error::AddressOutOfRange(address)
        })
    }

    fn prefix_at(&self, address: IpAddr) -> Result<Prefix> {
        match address {
            IpAddr::V6(v6) => Ok(Prefix::new(v6, self.prefix_length)),
            IpAddr::V4(_) => Err(Error::AddressOutOfRange(address)),
        }
    }

    /// Delegates the lowest free prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no prefix is available after the
    /// forced reclamation sweep.
    pub async fn allocate(&self) -> Result<Prefix> {
        let (_, address) = self.slots.allocate(self.lifetimes).await?;
        self.prefix_at(address)
    }

    pub async fn set_used(&self, prefix: Prefix) -> Result<()> {
        let slot = self.check_prefix(prefix, "set_used")?;
        self.slots.mark_used(slot).await?;
        Ok(())
    }

    pub async fn set_free(&self, prefix: Prefix) -> Result<()> {
        let slot = self.check_prefix(prefix, "set_free")?;
        if self.slots.mark_free(slot).await? {
            debug!("{} returned to {}", prefix, self);
        }
        Ok(())
    }

    pub async fn schedule_expiration(
        &self,
        prefix: Prefix,
        seconds: u64,
    ) -> Result<ScheduleOutcome> {
        let slot = self.check_prefix(prefix, "schedule_expiration")?;
        self.slots
            .schedule(slot, Duration::from_secs(seconds), self.lifetimes)
            .await
    }

    pub async fn cancel_expiration(&self, prefix: Prefix) -> Result<bool> {
        let slot = self.check_prefix(prefix, "cancel_expiration")?;
        Ok(self.slots.cancel(slot).await)
    }

    pub async fn is_free(&self, prefix: Prefix) -> bool {
        if prefix.length != self.prefix_length {
            return false;
        }
        match self.slots.map().slot_of(IpAddr::V6(prefix.address)) {
            Some(slot) => self.slots.is_free(slot).await,
            None => false,
        }
    }

    pub async fn free_count(&self) -> U256 {
        self.slots.free_count().await
    }

    pub async fn stats(&self) -> PoolStats {
        self.slots.stats().await
    }

    pub fn lifetimes(&self) -> Lifetimes {
        self.lifetimes
    }

    pub fn set_link_filter(&mut self, link_filter: Option<LinkFilter>) {
        self.link_filter = link_filter;
    }

    pub async fn shutdown(&self) {
        self.slots.shutdown().await;
        info!("Prefix pool {} shut down", self);
    }
}

impl BindingPool for PrefixBindingPool {
    fn range(&self) -> &Range {
        self.slots.map().range()
    }

    fn preferred_lifetime(&self) -> u32 {
        self.lifetimes.preferred
    }

    fn valid_lifetime(&self) -> u32 {
        self.lifetimes.valid
    }

    fn link_filter(&self) -> Option<&LinkFilter> {
        self.link_filter.as_ref()
    }
}

impl fmt::Display for PrefixBindingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range())
    }
}

impl fmt::Debug for PrefixBindingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixBindingPool")
            .field("range", self.range())
            .field("prefix_length", &self.prefix_length)
            .field("lifetimes", &self.lifetimes)
            .field("link_filter", &self.link_filter)
            .finish_non_exhaustive()
    }
}
