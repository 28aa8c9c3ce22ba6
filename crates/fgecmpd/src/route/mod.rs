//! Next-hop identification types shared with the route orchestrator.

mod nexthop;
mod nhg;

pub use nexthop::{NextHopFlags, NextHopKey, ParseNextHopKeyError};
pub use nhg::NextHopGroupKey;
