//! Inclusive address ranges.
//!
//! A [`Range`] is the numeric bound of a pool. Addresses are compared as
//! full-width unsigned integers (`u32` for IPv4, `u128` for IPv6, both
//! widened to `u128`), so an IPv6 address with the high bit set still sorts
//! above one without it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Returns the full-width unsigned value of an address.
pub fn address_value(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// An inclusive `[start, end]` range of addresses of a single family.
///
/// Serialized as the string `"<start>-<end>"`; deserialization also accepts
/// `"<network>/<length>"` and a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Range {
    start: IpAddr,
    end: IpAddr,
}

impl Range {
    /// Creates a range, validating family and ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the families differ or `start > end`.
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err(Error::InvalidRange(format!(
                "{} and {} are of different address families",
                start, end
            )));
        }
        if address_value(start) > address_value(end) {
            return Err(Error::InvalidRange(format!(
                "start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Builds a range from bounds already known to be ordered.
    pub(crate) const fn from_ordered(start: IpAddr, end: IpAddr) -> Self {
        Self { start, end }
    }

    /// Parses two address literals into a range.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_address(start)?, parse_address(end)?)
    }

    /// Creates the range covering every address of `network/length`.
    pub fn from_prefix(network: IpAddr, length: u8) -> Result<Self> {
        let width: u32 = if network.is_ipv4() { 32 } else { 128 };
        if u32::from(length) > width {
            return Err(Error::InvalidRange(format!(
                "prefix length {} exceeds {} bits",
                length, width
            )));
        }

        let host_bits = width - u32::from(length);
        let host_mask = if host_bits == 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        let first = address_value(network) & !host_mask;
        let last = first | host_mask;

        let range = Self {
            start: family_address(network, first),
            end: family_address(network, last),
        };
        Ok(range)
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn start_value(&self) -> u128 {
        address_value(self.start)
    }

    pub fn end_value(&self) -> u128 {
        address_value(self.end)
    }

    pub fn is_ipv6(&self) -> bool {
        self.start.is_ipv6()
    }

    /// Returns true iff `start <= addr <= end`.
    ///
    /// An address of the other family is never contained.
    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.start.is_ipv4() {
            return false;
        }
        let value = address_value(addr);
        value >= self.start_value() && value <= self.end_value()
    }

    /// Moves the start bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] and leaves the range unchanged if the
    /// new start would be greater than the end or is of another family.
    pub fn set_start(&mut self, start: IpAddr) -> Result<()> {
        *self = Self::new(start, self.end)?;
        Ok(())
    }

    /// Moves the end bound. Validated like [`Range::set_start`].
    pub fn set_end(&mut self, end: IpAddr) -> Result<()> {
        *self = Self::new(self.start, end)?;
        Ok(())
    }

    /// Number of addresses in the range.
    ///
    /// A full IPv6 range holds 2^128 addresses, one more than `u128` can
    /// represent.
    pub fn size(&self) -> U256 {
        U256::from(self.end_value() - self.start_value()) + U256::one()
    }

    /// Builds the address with the given numeric value in this range's family.
    ///
    /// Returns `None` when the value does not fit the family width.
    pub fn address_at(&self, value: u128) -> Option<IpAddr> {
        match self.start {
            IpAddr::V4(_) => u32::try_from(value)
                .ok()
                .map(|v4| IpAddr::V4(Ipv4Addr::from(v4))),
            IpAddr::V6(_) => Some(IpAddr::V6(Ipv6Addr::from(value))),
        }
    }
}

fn family_address(like: IpAddr, value: u128) -> IpAddr {
    match like {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

fn parse_address(literal: &str) -> Result<IpAddr> {
    literal
        .trim()
        .parse()
        .map_err(|_| Error::InvalidRange(format!("'{}' is not an IP address", literal.trim())))
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some((network, length)) = s.split_once('/') {
            let length: u8 = length
                .trim()
                .parse()
                .map_err(|_| Error::InvalidRange(format!("'{}' has a bad prefix length", s)))?;
            return Self::from_prefix(parse_address(network)?, length);
        }

        match s.split_once('-') {
            Some((start, end)) => Self::parse(start, end),
            None => {
                let addr = parse_address(s)?;
                Self::new(addr, addr)
            }
        }
    }
}

impl TryFrom<String> for Range {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Range> for String {
    fn from(range: Range) -> Self {
        range.to_string()
    }
}
