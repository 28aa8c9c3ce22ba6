//! Next-hop key type.
//!
//! A next-hop is a single forwarding destination: an IP address reachable
//! over an interface. Interface-only next-hops (unspecified address) stand
//! for directly-connected forwarding.

use fgecmp_types::{IpAddress, Ipv4Address};
use std::fmt;
use std::str::FromStr;

/// State flags attached to a next-hop by the neighbour layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NextHopFlags(u32);

impl NextHopFlags {
    pub const NONE: Self = Self(0);
    /// The next-hop's interface is operationally down.
    pub const IF_DOWN: Self = Self(1 << 0);

    pub fn is_if_down(&self) -> bool {
        self.0 & Self::IF_DOWN.0 != 0
    }

    pub fn set_if_down(&mut self, down: bool) {
        if down {
            self.0 |= Self::IF_DOWN.0;
        } else {
            self.0 &= !Self::IF_DOWN.0;
        }
    }
}

/// A key identifying a single next-hop as `ip@alias`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHopKey {
    ip_address: IpAddress,
    alias: String,
}

impl NextHopKey {
    pub fn new(ip_address: IpAddress, alias: impl Into<String>) -> Self {
        Self {
            ip_address,
            alias: alias.into(),
        }
    }

    /// Creates an interface-only next-hop key.
    pub fn interface_only(alias: impl Into<String>) -> Self {
        Self {
            ip_address: IpAddress::V4(Ipv4Address::UNSPECIFIED),
            alias: alias.into(),
        }
    }

    pub fn ip_address(&self) -> &IpAddress {
        &self.ip_address
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn is_interface_nexthop(&self) -> bool {
        self.ip_address.is_unspecified()
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_interface_nexthop() {
            write!(f, "{}", self.alias)
        } else {
            write!(f, "{}@{}", self.ip_address, self.alias)
        }
    }
}

/// Error when parsing a [`NextHopKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNextHopKeyError {
    pub message: String,
}

impl fmt::Display for ParseNextHopKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid next-hop key: {}", self.message)
    }
}

impl std::error::Error for ParseNextHopKeyError {}

impl FromStr for NextHopKey {
    type Err = ParseNextHopKeyError;

    /// Parses `ip@alias`, or a bare alias for interface-only next-hops.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some((ip_part, alias)) = s.split_once('@') {
            let ip = ip_part.parse().map_err(|_| ParseNextHopKeyError {
                message: format!("Invalid IP address: {}", ip_part),
            })?;
            return Ok(Self::new(ip, alias));
        }

        Ok(Self::interface_only(s))
    }
}
