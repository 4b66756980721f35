//! The capability shared by address and prefix pools.
//!
//! Link selection only needs a pool's range, its lifetimes and its link
//! filter, so it works against [`BindingPool`] and never against a concrete
//! pool type.

use std::net::IpAddr;

use primitive_types::U256;

use crate::filter::{LinkContext, LinkFilter};
use crate::range::Range;

/// Range, lifetimes and link scoping of a pool.
pub trait BindingPool: Send + Sync {
    fn range(&self) -> &Range;

    fn contains(&self, addr: IpAddr) -> bool {
        self.range().contains(addr)
    }

    /// Preferred lifetime in seconds.
    fn preferred_lifetime(&self) -> u32;

    /// Valid lifetime in seconds.
    fn valid_lifetime(&self) -> u32;

    fn preferred_lifetime_ms(&self) -> u64 {
        u64::from(self.preferred_lifetime()) * 1000
    }

    fn valid_lifetime_ms(&self) -> u64 {
        u64::from(self.valid_lifetime()) * 1000
    }

    fn link_filter(&self) -> Option<&LinkFilter>;

    /// True if a request arriving on `link` may be served from this pool.
    ///
    /// A pool without a link filter serves every link.
    fn is_eligible(&self, link: &LinkContext) -> bool {
        self.link_filter().is_none_or(|filter| filter.matches(link))
    }
}

/// Point-in-time utilization of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Addresses (or prefixes) the pool can hand out.
    pub capacity: U256,
    pub free: U256,
    /// Number of disjoint free intervals, i.e. allocation holes plus one.
    pub free_intervals: usize,
    pub pending_expirations: usize,
}

impl PoolStats {
    pub fn used(&self) -> U256 {
        self.capacity - self.free
    }
}
