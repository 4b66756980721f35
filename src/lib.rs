//! # dhcp6pool
//!
//! The address and prefix allocation core of a DHCPv6 server.
//!
//! ## Features
//!
//! - Allocation of single addresses and delegated prefixes from configured ranges
//! - Free space tracked as coalescing intervals, so `/64`-sized pools are cheap
//! - Per-pool lease expiration timers with renewal (replace) semantics
//! - Forced reclamation of overdue leases before reporting exhaustion
//! - Link filters scoping pools to the links requests arrive on
//! - Async/await with Tokio; one lock per pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dhcp6pool::{Config, NullBindingStore, PoolSet};
//!
//! #[tokio::main]
//! async fn main() -> dhcp6pool::Result<()> {
//!     let config = Config::load_or_create("pools.json")?;
//!     let pools = PoolSet::from_config(&config, Arc::new(NullBindingStore))?;
//!
//!     let pool = &pools.address_pools()[0];
//!     let addr = pool.allocate().await?;
//!     pool.schedule_expiration(addr, 600).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Range`] - Inclusive address bounds of a pool
//! - [`FreeList`] - Free/used tracking with interval coalescing
//! - [`ExpirationScheduler`] - Per-pool one-shot lease expiration timers
//! - [`AddressBindingPool`] / [`PrefixBindingPool`] - The pools the protocol layer talks to
//! - [`BindingPool`] - Capability shared by both pool kinds, used for link selection
//! - [`BindingStore`] - Persistence collaborator notified of binding changes

pub mod address_pool;
pub mod binding;
pub mod config;
pub mod error;
pub mod filter;
pub mod free_list;
pub mod pool;
pub mod pool_set;
pub mod prefix_pool;
pub mod range;
pub mod scheduler;
mod slots;

pub use address_pool::AddressBindingPool;
pub use binding::{BindingEvent, BindingEventKind, BindingStore, Lifetimes, NullBindingStore};
pub use config::{AddressPoolConfig, Config, PrefixPoolConfig};
pub use error::{Error, Result};
pub use filter::{FilterExpression, LinkContext, LinkFilter};
pub use free_list::FreeList;
pub use pool::{BindingPool, PoolStats};
pub use pool_set::PoolSet;
pub use prefix_pool::{Prefix, PrefixBindingPool};
pub use range::Range;
pub use scheduler::{ExpirationScheduler, ScheduleOutcome};
