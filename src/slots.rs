//! The locked allocation engine shared by address and prefix pools.
//!
//! A pool hands out "slots": single addresses for an address pool, or
//! aligned prefixes of a fixed length for a prefix pool. [`SlotMap`]
//! translates between slots and addresses; [`LeaseSlots`] owns the
//! [`FreeList`] and [`ExpirationScheduler`] behind one mutex, so allocation,
//! release, scheduling and timer firing are serialized per pool.

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use primitive_types::U256;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::binding::{BindingEvent, BindingEventKind, BindingStore, Lifetimes};
use crate::error::{Error, Result};
use crate::free_list::FreeList;
use crate::pool::PoolStats;
use crate::range::{Range, address_value};
use crate::scheduler::{ExpirationScheduler, ScheduleOutcome, TaskId};

/// Maps between slot numbers and addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotMap {
    range: Range,
    shift: u32,
    prefix_length: Option<u8>,
}

impl SlotMap {
    /// One slot per address.
    pub fn addresses(range: Range) -> Self {
        Self {
            range,
            shift: 0,
            prefix_length: None,
        }
    }

    /// One slot per aligned `/length` prefix whose network address is in range.
    pub fn prefixes(range: Range, length: u8) -> Result<Self> {
        if !range.is_ipv6() {
            return Err(Error::InvalidConfig(format!(
                "prefix pool {} must be IPv6",
                range
            )));
        }
        if length == 0 || length > 128 {
            return Err(Error::InvalidConfig(format!(
                "prefix length {} must be between 1 and 128",
                length
            )));
        }
        Ok(Self {
            range,
            shift: 128 - u32::from(length),
            prefix_length: Some(length),
        })
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn with_range(self, range: Range) -> Self {
        Self { range, ..self }
    }

    pub fn prefix_length(&self) -> Option<u8> {
        self.prefix_length
    }

    fn host_mask(&self) -> u128 {
        if self.shift == 0 {
            0
        } else {
            u128::MAX >> (128 - self.shift)
        }
    }

    /// First and last slot covered by the range.
    pub fn bounds(&self) -> Result<(u128, u128)> {
        let start = self.range.start_value();
        let end = self.range.end_value();
        let mut first = start >> self.shift;
        if start & self.host_mask() != 0 {
            first += 1;
        }
        let last = end >> self.shift;

        if first > last {
            return Err(Error::InvalidConfig(format!(
                "range {} holds no /{} prefix",
                self.range,
                self.prefix_length.unwrap_or(128)
            )));
        }
        Ok((first, last))
    }

    /// The slot of `addr`, if `addr` is in range and slot-aligned.
    pub fn slot_of(&self, addr: IpAddr) -> Option<u128> {
        if !self.range.contains(addr) {
            return None;
        }
        let value = address_value(addr);
        if value & self.host_mask() != 0 {
            return None;
        }
        Some(value >> self.shift)
    }

    pub fn address_of(&self, slot: u128) -> Option<IpAddr> {
        self.range.address_at(slot << self.shift)
    }

    fn event(
        &self,
        slot: u128,
        kind: BindingEventKind,
        lifetimes: Lifetimes,
    ) -> Option<BindingEvent> {
        match self.address_of(slot) {
            Some(address) => Some(BindingEvent::new(address, self.prefix_length, kind, lifetimes)),
            None => {
                warn!("{}: cannot build an address for slot {:#x}", self.range, slot);
                None
            }
        }
    }
}

#[derive(Debug)]
struct SlotState {
    free_list: FreeList,
    scheduler: ExpirationScheduler,
}

impl SlotState {
    /// Reclaims `slot` if task `id` is still the one pending for it.
    fn expire(&mut self, slot: u128, id: TaskId) -> bool {
        if !self.scheduler.complete(slot, id) {
            return false;
        }
        self.free_list.mark_free(slot).unwrap_or(false)
    }
}

/// Free list and expiration timers of one pool, under a single lock.
///
/// Notifications to the [`BindingStore`] are delivered while the lock is
/// held, so the store sees the events of one address in the order the pool
/// applied them.
pub(crate) struct LeaseSlots {
    state: Arc<Mutex<SlotState>>,
    store: Arc<dyn BindingStore>,
    map: SlotMap,
}

impl LeaseSlots {
    pub fn new(map: SlotMap, store: Arc<dyn BindingStore>) -> Result<Self> {
        let (first, last) = map.bounds()?;
        let state = SlotState {
            free_list: FreeList::new(first, last)?,
            scheduler: ExpirationScheduler::new(format!("{}_reaper", map.range())),
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            store,
            map,
        })
    }

    pub fn map(&self) -> &SlotMap {
        &self.map
    }

    fn ensure_open(&self, state: &SlotState) -> Result<()> {
        if state.scheduler.is_closed() {
            debug!("Pool {} is shut down", self.map.range());
            return Err(Error::PoolShutDown);
        }
        Ok(())
    }

    /// Takes the lowest free slot, sweeping expired leases first if needed.
    pub async fn allocate(&self, lifetimes: Lifetimes) -> Result<(u128, IpAddr)> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;

        let slot = match state.free_list.next_free() {
            Some(slot) => slot,
            None => {
                self.sweep(&mut state, lifetimes);
                match state.free_list.next_free() {
                    Some(slot) => slot,
                    None => {
                        warn!("Pool {} exhausted", self.map.range());
                        return Err(Error::PoolExhausted);
                    }
                }
            }
        };

        let Some(address) = self.map.address_of(slot) else {
            if let Err(error) = state.free_list.mark_free(slot) {
                warn!("{}: cannot return slot {:#x}: {}", self.map.range(), slot, error);
            }
            warn!("{}: slot {:#x} has no address", self.map.range(), slot);
            return Err(Error::OutOfSpan(slot));
        };

        self.store.notify(BindingEvent::new(
            address,
            self.map.prefix_length(),
            BindingEventKind::Allocated,
            lifetimes,
        ));
        debug!("Allocated {} from {}", address, self.map.range());
        Ok((slot, address))
    }

    /// Fires overdue timers and reclaims leases the store reports expired.
    fn sweep(&self, state: &mut SlotState, lifetimes: Lifetimes) {
        let mut overdue = 0usize;
        for slot in state.scheduler.take_overdue(Instant::now()) {
            if state.free_list.mark_free(slot).unwrap_or(false)
                && let Some(event) = self.map.event(slot, BindingEventKind::Expired, lifetimes)
            {
                self.store.notify(event);
                overdue += 1;
            }
        }

        let mut confirmed = 0usize;
        for addr in self.store.confirmed_expired(self.map.range()) {
            let Some(slot) = self.map.slot_of(addr) else {
                debug!("Ignoring expired {} outside {}", addr, self.map.range());
                continue;
            };
            state.scheduler.cancel(slot);
            if state.free_list.mark_free(slot).unwrap_or(false) {
                confirmed += 1;
            }
        }

        if overdue > 0 || confirmed > 0 {
            info!(
                "Reclaimed {} overdue and {} confirmed expired binding(s) in {}",
                overdue,
                confirmed,
                self.map.range()
            );
        }
    }

    pub async fn mark_used(&self, slot: u128) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        state.free_list.mark_used(slot)
    }

    /// Returns `slot` to the pool and cancels its pending expiration.
    pub async fn mark_free(&self, slot: u128) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        let freed = state.free_list.mark_free(slot)?;
        state.scheduler.cancel(slot);
        Ok(freed)
    }

    pub async fn is_free(&self, slot: u128) -> bool {
        self.state.lock().await.free_list.is_free(slot)
    }

    /// Arms (or re-arms) the expiration of `slot`.
    ///
    /// The slot is marked used; a slot with a pending expiration is leased.
    /// A shut down pool is left untouched and reports
    /// [`ScheduleOutcome::Closed`].
    pub async fn schedule(
        &self,
        slot: u128,
        delay: Duration,
        lifetimes: Lifetimes,
    ) -> Result<ScheduleOutcome> {
        let mut state = self.state.lock().await;
        self.arm(&mut state, slot, delay, lifetimes)
    }

    fn arm(
        &self,
        state: &mut SlotState,
        slot: u128,
        delay: Duration,
        lifetimes: Lifetimes,
    ) -> Result<ScheduleOutcome> {
        if state.scheduler.is_closed() {
            return Ok(ScheduleOutcome::Closed);
        }
        state.free_list.mark_used(slot)?;

        let weak: Weak<Mutex<SlotState>> = Arc::downgrade(&self.state);
        let store = Arc::clone(&self.store);
        let map = self.map;

        let outcome = state.scheduler.schedule(slot, delay, move |id| async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut state = shared.lock().await;
            if state.expire(slot, id)
                && let Some(event) = map.event(slot, BindingEventKind::Expired, lifetimes)
            {
                info!("Lease for {} expired, returned to {}", event.address, map.range());
                store.notify(event);
            }
        });

        if let ScheduleOutcome::Replaced(_) = outcome
            && let Some(event) = self.map.event(slot, BindingEventKind::Renewed, lifetimes)
        {
            self.store.notify(event);
        }
        Ok(outcome)
    }

    pub async fn cancel(&self, slot: u128) -> bool {
        self.state.lock().await.scheduler.cancel(slot)
    }

    /// Moves the pool to a new range.
    ///
    /// Timers for slots that fall outside the new range are cancelled.
    pub async fn set_range(&mut self, range: Range) -> Result<()> {
        let map = self.map.with_range(range);
        let (first, last) = map.bounds()?;

        let mut state = self.state.lock().await;
        self.ensure_open(&state)?;
        state.free_list.resize(first, last)?;
        let dropped = state.scheduler.retain_within(first, last);
        drop(state);

        if dropped > 0 {
            debug!("Cancelled {} expiration(s) outside {}", dropped, range);
        }
        self.map = map;
        Ok(())
    }

    pub async fn free_count(&self) -> U256 {
        self.state.lock().await.free_list.free_count()
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            capacity: state.free_list.capacity(),
            free: state.free_list.free_count(),
            free_intervals: state.free_list.interval_count(),
            pending_expirations: state.scheduler.pending_count(),
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::testing::RecordingStore;

    fn test_slots() -> (LeaseSlots, Arc<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        let range: Range = "2001:db8::1-2001:db8::4".parse().unwrap();
        let slots = LeaseSlots::new(SlotMap::addresses(range), store.clone()).unwrap();
        (slots, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_woken_timer_loses_to_renewal() {
        let (slots, store) = test_slots();
        let lifetimes = Lifetimes::new(300, 600).unwrap();
        let (slot, _) = slots.allocate(lifetimes).await.unwrap();
        slots.schedule(slot, Duration::from_secs(10), lifetimes).await.unwrap();

        // Hold the pool lock across the deadline so the timer wakes and
        // queues behind us, then renew under that same lock.
        let mut state = slots.state.lock().await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        let outcome = slots
            .arm(&mut state, slot, Duration::from_secs(600), lifetimes)
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Replaced(_)));
        drop(state);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!slots.is_free(slot).await);
        assert_eq!(slots.stats().await.pending_expirations, 1);
        assert_eq!(store.count(BindingEventKind::Expired), 0);
        assert_eq!(store.count(BindingEventKind::Renewed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_does_not_free() {
        let (slots, _store) = test_slots();
        let lifetimes = Lifetimes::new(300, 600).unwrap();
        let (slot, _) = slots.allocate(lifetimes).await.unwrap();

        let first = match slots.schedule(slot, Duration::from_secs(10), lifetimes).await {
            Ok(ScheduleOutcome::Installed(id)) => id,
            other => panic!("unexpected outcome {:?}", other),
        };
        slots.schedule(slot, Duration::from_secs(600), lifetimes).await.unwrap();

        let mut state = slots.state.lock().await;
        assert!(!state.expire(slot, first));
        assert!(!state.free_list.is_free(slot));
    }

    #[tokio::test]
    async fn test_shut_down_slots_refuse_changes() {
        let (slots, _store) = test_slots();
        let lifetimes = Lifetimes::new(300, 600).unwrap();
        let slot = address_value("2001:db8::2".parse().unwrap());
        slots.shutdown().await;

        assert!(matches!(slots.allocate(lifetimes).await, Err(Error::PoolShutDown)));
        assert!(matches!(slots.mark_used(slot).await, Err(Error::PoolShutDown)));
        assert_eq!(
            slots.schedule(slot, Duration::from_secs(5), lifetimes).await.unwrap(),
            ScheduleOutcome::Closed
        );
        assert!(slots.is_free(slot).await);
        assert_eq!(slots.free_count().await, U256::from(4));
    }

    #[test]
    fn test_prefix_slot_map() {
        let range: Range = "2001:db8::-2001:db8:0:2ff::".parse().unwrap();
        let map = SlotMap::prefixes(range, 56).unwrap();
        let (first, last) = map.bounds().unwrap();
        assert_eq!(last - first, 2);
        assert_eq!(map.address_of(first + 1), Some("2001:db8:0:100::".parse().unwrap()));
        assert_eq!(map.slot_of("2001:db8:0:180::".parse().unwrap()), None);
        assert!(SlotMap::prefixes(range, 0).is_err());
    }
}
