//! All pools built from one configuration.
//!
//! A [`PoolSet`] lives for exactly one configuration generation. On reload
//! the old set is shut down, cancelling every pending expiration, before a
//! new one is built, so no timer fires against a retired pool.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::info;

use crate::address_pool::AddressBindingPool;
use crate::binding::BindingStore;
use crate::config::Config;
use crate::error::Result;
use crate::filter::LinkContext;
use crate::pool::BindingPool;
use crate::prefix_pool::PrefixBindingPool;

#[derive(Debug, Default)]
pub struct PoolSet {
    address_pools: Vec<Arc<AddressBindingPool>>,
    prefix_pools: Vec<Arc<PrefixBindingPool>>,
}

impl PoolSet {
    /// Builds every configured pool.
    ///
    /// # Errors
    ///
    /// Fails on the first pool that cannot be activated.
    pub fn from_config(config: &Config, store: Arc<dyn BindingStore>) -> Result<Self> {
        config.validate()?;

        let address_pools = config
            .address_pools
            .iter()
            .map(|pool| AddressBindingPool::from_config(pool, Arc::clone(&store)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let prefix_pools = config
            .prefix_pools
            .iter()
            .map(|pool| PrefixBindingPool::from_config(pool, Arc::clone(&store)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Activated {} address pool(s) and {} prefix pool(s)",
            address_pools.len(),
            prefix_pools.len()
        );
        Ok(Self {
            address_pools,
            prefix_pools,
        })
    }

    pub fn address_pools(&self) -> &[Arc<AddressBindingPool>] {
        &self.address_pools
    }

    pub fn prefix_pools(&self) -> &[Arc<PrefixBindingPool>] {
        &self.prefix_pools
    }

    /// The address pool containing `addr`, e.g. to validate a client hint.
    pub fn address_pool_for(&self, addr: IpAddr) -> Option<&Arc<AddressBindingPool>> {
        self.address_pools.iter().find(|pool| pool.contains(addr))
    }

    pub fn prefix_pool_for(&self, addr: IpAddr) -> Option<&Arc<PrefixBindingPool>> {
        self.prefix_pools.iter().find(|pool| pool.contains(addr))
    }

    pub fn eligible_address_pools(&self, link: &LinkContext) -> Vec<&Arc<AddressBindingPool>> {
        self.address_pools
            .iter()
            .filter(|pool| pool.is_eligible(link))
            .collect()
    }

    pub fn eligible_prefix_pools(&self, link: &LinkContext) -> Vec<&Arc<PrefixBindingPool>> {
        self.prefix_pools
            .iter()
            .filter(|pool| pool.is_eligible(link))
            .collect()
    }

    /// Every pool, address and prefix alike, eligible for `link`.
    pub fn eligible_pools(&self, link: &LinkContext) -> Vec<&dyn BindingPool> {
        let addresses = self.address_pools.iter().map(|pool| pool.as_ref() as &dyn BindingPool);
        let prefixes = self.prefix_pools.iter().map(|pool| pool.as_ref() as &dyn BindingPool);
        addresses
            .chain(prefixes)
            .filter(|pool| pool.is_eligible(link))
            .collect()
    }

    /// Cancels every pending expiration in every pool.
    pub async fn shutdown(&self) {
        for pool in &self.address_pools {
            pool.shutdown().await;
        }
        for pool in &self.prefix_pools {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::NullBindingStore;
    use crate::config::{AddressPoolConfig, PrefixPoolConfig};
    use crate::filter::{FilterExpression, LinkFilter};

    fn config() -> Config {
        Config {
            address_pools: vec![
                AddressPoolConfig {
                    range: "2001:db8:1::1-2001:db8:1::ff".parse().unwrap(),
                    preferred_lifetime: 300,
                    valid_lifetime: 600,
                    link_filter: Some(LinkFilter::new(
                        "lab",
                        vec![FilterExpression::Interface("eth1".to_string())],
                    )),
                },
                AddressPoolConfig {
                    range: "2001:db8:2::1-2001:db8:2::ff".parse().unwrap(),
                    preferred_lifetime: 300,
                    valid_lifetime: 600,
                    link_filter: None,
                },
            ],
            prefix_pools: vec![PrefixPoolConfig {
                range: "2001:db8:100::/40".parse().unwrap(),
                prefix_length: 48,
                preferred_lifetime: 1800,
                valid_lifetime: 3600,
                link_filter: Some(LinkFilter::new(
                    "lab",
                    vec![FilterExpression::Interface("eth1".to_string())],
                )),
            }],
        }
    }

    fn link(interface: &str) -> LinkContext {
        LinkContext {
            interface: Some(interface.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_builds_all_pools() {
        let pools = PoolSet::from_config(&config(), Arc::new(NullBindingStore)).unwrap();
        assert_eq!(pools.address_pools().len(), 2);
        assert_eq!(pools.prefix_pools().len(), 1);

        let pool = pools.address_pool_for("2001:db8:2::10".parse().unwrap()).unwrap();
        assert_eq!(pool.to_string(), "2001:db8:2::1-2001:db8:2::ff");
        assert!(pools.address_pool_for("2001:db8:3::1".parse().unwrap()).is_none());
        assert!(pools.prefix_pool_for("2001:db8:1ff::".parse().unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_eligibility_by_link() {
        let pools = PoolSet::from_config(&config(), Arc::new(NullBindingStore)).unwrap();

        assert_eq!(pools.eligible_address_pools(&link("eth1")).len(), 2);
        assert_eq!(pools.eligible_address_pools(&link("eth0")).len(), 1);
        assert_eq!(pools.eligible_prefix_pools(&link("eth0")).len(), 0);

        let all = pools.eligible_pools(&link("eth1"));
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].valid_lifetime(), 3600);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_activation() {
        let mut bad = config();
        bad.address_pools[1].preferred_lifetime = 900;
        assert!(PoolSet::from_config(&bad, Arc::new(NullBindingStore)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_expirations() {
        let pools = PoolSet::from_config(&config(), Arc::new(NullBindingStore)).unwrap();
        let pool = &pools.address_pools()[1];
        let ip = pool.allocate().await.unwrap();
        pool.schedule_expiration(ip, 5).await.unwrap();

        pools.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert!(!pool.is_free(ip).await);
    }
}
