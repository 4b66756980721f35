use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use crate::binding::Lifetimes;
use crate::error::{Error, Result};
use crate::filter::LinkFilter;
use crate::range::Range;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub address_pools: Vec<AddressPoolConfig>,
    #[serde(default)]
    pub prefix_pools: Vec<PrefixPoolConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPoolConfig {
    pub range: Range,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    #[serde(default)]
    pub link_filter: Option<LinkFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixPoolConfig {
    pub range: Range,
    pub prefix_length: u8,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    #[serde(default)]
    pub link_filter: Option<LinkFilter>,
}

impl AddressPoolConfig {
    pub fn lifetimes(&self) -> Result<Lifetimes> {
        Lifetimes::new(self.preferred_lifetime, self.valid_lifetime)
    }
}

impl PrefixPoolConfig {
    pub fn lifetimes(&self) -> Result<Lifetimes> {
        Lifetimes::new(self.preferred_lifetime, self.valid_lifetime)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address_pools: vec![AddressPoolConfig {
                range: Range::from_ordered(
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x100)),
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x1ff)),
                ),
                preferred_lifetime: 3600,
                valid_lifetime: 7200,
                link_filter: None,
            }],
            prefix_pools: vec![PrefixPoolConfig {
                range: Range::from_ordered(
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0x100, 0, 0, 0, 0, 0)),
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0x1ff, 0xff00, 0, 0, 0, 0)),
                ),
                prefix_length: 56,
                preferred_lifetime: 3600,
                valid_lifetime: 7200,
                link_filter: None,
            }],
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for pool in &self.address_pools {
            pool.lifetimes().map_err(|error| {
                Error::InvalidConfig(format!("address pool {}: {}", pool.range, error))
            })?;
        }

        for pool in &self.prefix_pools {
            pool.lifetimes().map_err(|error| {
                Error::InvalidConfig(format!("prefix pool {}: {}", pool.range, error))
            })?;

            if !pool.range.is_ipv6() {
                return Err(Error::InvalidConfig(format!(
                    "prefix pool {} must be IPv6",
                    pool.range
                )));
            }
            if pool.prefix_length == 0 || pool.prefix_length > 128 {
                return Err(Error::InvalidConfig(format!(
                    "prefix pool {}: prefix_length must be between 1 and 128",
                    pool.range
                )));
            }
        }

        let ranges: Vec<&Range> = self
            .address_pools
            .iter()
            .map(|pool| &pool.range)
            .chain(self.prefix_pools.iter().map(|pool| &pool.range))
            .collect();
        for (index, first) in ranges.iter().enumerate() {
            for second in &ranges[index + 1..] {
                if first.contains(second.start()) || second.contains(first.start()) {
                    return Err(Error::InvalidConfig(format!(
                        "pools {} and {} overlap",
                        first, second
                    )));
                }
            }
        }

        Ok(())
    }
}
