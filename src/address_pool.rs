//! Address binding pools.
//!
//! An [`AddressBindingPool`] hands out single addresses from a [`Range`].
//! It is the unit the protocol layer talks to: `allocate` for new clients,
//! `set_used` to confirm or restore a binding, `set_free` on release, and
//! `schedule_expiration` whenever a lease is granted or renewed.
//!
//! # Thread Safety
//!
//! The pool is shared behind an [`Arc`] by every request handler. All
//! mutations run under one per-pool [`tokio::sync::Mutex`], including the
//! timer tasks that reclaim expired leases, so two callers can never be
//! handed the same address.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use primitive_types::U256;
use tracing::{debug, info, warn};

use crate::binding::{BindingStore, Lifetimes};
use crate::config::AddressPoolConfig;
use crate::error::{Error, Result};
use crate::filter::LinkFilter;
use crate::pool::{BindingPool, PoolStats};
use crate::range::Range;
use crate::scheduler::ScheduleOutcome;
use crate::slots::{LeaseSlots, SlotMap};

/// A pool of individually leased addresses.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use dhcp6pool::{AddressBindingPool, Lifetimes, NullBindingStore, Range};
///
/// # async fn example() -> dhcp6pool::Result<()> {
/// let range: Range = "2001:db8::1-2001:db8::a".parse()?;
/// let lifetimes = Lifetimes::new(300, 600)?;
/// let pool = AddressBindingPool::new(range, lifetimes, Arc::new(NullBindingStore))?;
///
/// let addr = pool.allocate().await?;
/// pool.schedule_expiration(addr, 600).await?;
/// # Ok(())
/// # }
/// ```
pub struct AddressBindingPool {
    lifetimes: Lifetimes,
    link_filter: Option<LinkFilter>,
    slots: LeaseSlots,
}

impl AddressBindingPool {
    /// Creates a pool where every address of `range` is free.
    pub fn new(range: Range, lifetimes: Lifetimes, store: Arc<dyn BindingStore>) -> Result<Self> {
        let slots = LeaseSlots::new(SlotMap::addresses(range), store)?;
        info!(
            "Address pool {} ({} addresses, preferred {}s, valid {}s)",
            range,
            range.size(),
            lifetimes.preferred,
            lifetimes.valid
        );
        Ok(Self {
            lifetimes,
            link_filter: None,
            slots,
        })
    }

    pub fn from_config(config: &AddressPoolConfig, store: Arc<dyn BindingStore>) -> Result<Self> {
        let pool = Self::new(config.range, config.lifetimes()?, store)?;
        Ok(pool.with_link_filter(config.link_filter.clone()))
    }

    pub fn with_link_filter(mut self, link_filter: Option<LinkFilter>) -> Self {
        self.link_filter = link_filter;
        self
    }

    fn check_contains(&self, addr: IpAddr, operation: &str) -> Result<u128> {
        match self.slots.map().slot_of(addr) {
            Some(slot) => Ok(slot),
            None => {
                warn!("{} of {} rejected: outside pool {}", operation, addr, self.range());
                Err(Error::AddressOutOfRange(addr))
            }
        }
    }

    /// Hands out the lowest free address.
    ///
    /// When nothing is free, leases whose expiration is overdue (and any the
    /// binding store reports as expired) are reclaimed first and the
    /// allocation is retried once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no address is available.
    pub async fn allocate(&self) -> Result<IpAddr> {
        let (_, addr) = self.slots.allocate(self.lifetimes).await?;
        Ok(addr)
    }

    /// Marks `addr` as in use. Marking a used address again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressOutOfRange`] if `addr` is not in the pool;
    /// the pool is unchanged.
    pub async fn set_used(&self, addr: IpAddr) -> Result<()> {
        let slot = self.check_contains(addr, "set_used")?;
        if self.slots.mark_used(slot).await? {
            debug!("{} marked used in {}", addr, self.range());
        }
        Ok(())
    }

    /// Returns `addr` to the pool and cancels its pending expiration.
    ///
    /// Freeing a free address is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressOutOfRange`] if `addr` is not in the pool.
    pub async fn set_free(&self, addr: IpAddr) -> Result<()> {
        let slot = self.check_contains(addr, "set_free")?;
        if self.slots.mark_free(slot).await? {
            debug!("{} returned to {}", addr, self.range());
        }
        Ok(())
    }

    /// Arms the expiration of the lease on `addr`, `seconds` from now.
    ///
    /// Calling it again for the same address (a renewal) replaces the
    /// pending expiration; only the latest one can ever fire.
    pub async fn schedule_expiration(&self, addr: IpAddr, seconds: u64) -> Result<ScheduleOutcome> {
        let slot = self.check_contains(addr, "schedule_expiration")?;
        let outcome = self
            .slots
            .schedule(slot, Duration::from_secs(seconds), self.lifetimes)
            .await?;
        debug!("Expiration of {} in {}s: {:?}", addr, seconds, outcome);
        Ok(outcome)
    }

    /// Cancels the pending expiration of `addr` without freeing it.
    pub async fn cancel_expiration(&self, addr: IpAddr) -> Result<bool> {
        let slot = self.check_contains(addr, "cancel_expiration")?;
        Ok(self.slots.cancel(slot).await)
    }

    pub async fn is_free(&self, addr: IpAddr) -> bool {
        match self.slots.map().slot_of(addr) {
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

    /// Moves the start of the pool range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the new start is after the end;
    /// the pool is unchanged.
    pub async fn set_start_address(&mut self, start: IpAddr) -> Result<()> {
        let mut range = *self.range();
        range.set_start(start)?;
        self.slots.set_range(range).await
    }

    /// Moves the end of the pool range. Validated like
    /// [`AddressBindingPool::set_start_address`].
    pub async fn set_end_address(&mut self, end: IpAddr) -> Result<()> {
        let mut range = *self.range();
        range.set_end(end)?;
        self.slots.set_range(range).await
    }

    pub fn set_preferred_lifetime(&mut self, seconds: u32) -> Result<()> {
        self.lifetimes = Lifetimes::new(seconds, self.lifetimes.valid)?;
        Ok(())
    }

    pub fn set_valid_lifetime(&mut self, seconds: u32) -> Result<()> {
        self.lifetimes = Lifetimes::new(self.lifetimes.preferred, seconds)?;
        Ok(())
    }

    pub fn lifetimes(&self) -> Lifetimes {
        self.lifetimes
    }

    pub fn set_link_filter(&mut self, link_filter: Option<LinkFilter>) {
        self.link_filter = link_filter;
    }

    /// Cancels every pending expiration. Used when the pool is retired.
    ///
    /// Afterwards `allocate`, `set_used`, `set_free` and the range setters
    /// fail with [`Error::PoolShutDown`], and `schedule_expiration` reports
    /// [`ScheduleOutcome::Closed`] without touching the pool.
    pub async fn shutdown(&self) {
        self.slots.shutdown().await;
        info!("Address pool {} shut down", self.range());
    }
}

impl BindingPool for AddressBindingPool {
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

impl fmt::Display for AddressBindingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range())
    }
}

impl fmt::Debug for AddressBindingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressBindingPool")
            .field("range", self.range())
            .field("lifetimes", &self.lifetimes)
            .field("link_filter", &self.link_filter)
            .finish_non_exhaustive()
    }
}
