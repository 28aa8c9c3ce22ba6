//! Neighbour entry types.

use crate::route::{NextHopFlags, NextHopKey};
use fgecmp_orch_common::HasRefCount;
use fgecmp_sai::NextHopOid;
use fgecmp_types::MacAddress;

/// A resolved neighbour and its programmed next-hop object.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub key: NextHopKey,
    pub mac: MacAddress,
    pub nh_id: NextHopOid,
    pub flags: NextHopFlags,
    ref_count: u32,
}

impl NeighborEntry {
    pub fn new(key: NextHopKey, mac: MacAddress, nh_id: NextHopOid) -> Self {
        Self {
            key,
            mac,
            nh_id,
            flags: NextHopFlags::NONE,
            ref_count: 0,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.key.ip_address().is_ipv4()
    }
}

impl HasRefCount for NeighborEntry {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count += 1;
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        if self.ref_count == 0 {
            None
        } else {
            self.ref_count -= 1;
            Some(self.ref_count)
        }
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}
