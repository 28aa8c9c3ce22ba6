//! Shared value types for the fgecmpd controller.
//!
//! These wrappers exist so that table keys and southbound identifiers carry
//! their parsing and formatting rules with them instead of passing raw
//! strings between modules.

mod ip;
mod mac;
mod port;

pub use ip::{IpAddress, IpPrefix, Ipv4Address, Ipv6Address};
pub use mac::MacAddress;
pub use port::PortOperStatus;

use thiserror::Error;

/// Error type for parsing failures of the shared value types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid IP prefix: {0}")]
    InvalidIpPrefix(String),

    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),
}
