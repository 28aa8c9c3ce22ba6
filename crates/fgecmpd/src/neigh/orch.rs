//! Neighbour resolution table.
//!
//! Owns the `(ip, interface) → (mac, next-hop id)` mapping and the
//! per-next-hop reference counts consulted by the fine-grained controller.
//! A next-hop's count equals the number of group instances currently
//! listing it as active; removal of a still-referenced neighbour is
//! refused.

use super::types::NeighborEntry;
use crate::crm::{CrmOrch, CrmResourceType};
use crate::route::NextHopKey;
use fgecmp_orch_common::{HasRefCount, SyncMap};
use fgecmp_sai::NextHopOid;
use fgecmp_types::{IpAddress, MacAddress};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NeighOrchError {
    #[error("Neighbor not found: {0}")]
    NeighborNotFound(String),

    #[error("Neighbor {0} still referenced ({1})")]
    StillReferenced(String, u32),
}

/// Neighbour resolver state.
pub struct NeighOrch {
    neighbors: SyncMap<NextHopKey, NeighborEntry>,
    crm: Arc<Mutex<CrmOrch>>,
}

impl NeighOrch {
    pub fn new(crm: Arc<Mutex<CrmOrch>>) -> Self {
        Self {
            neighbors: SyncMap::new(),
            crm,
        }
    }

    /// Records a resolved neighbour and its programmed next-hop object.
    ///
    /// Re-resolution of a known key updates the MAC in place.
    pub fn add_neighbor(&mut self, key: NextHopKey, mac: MacAddress, nh_id: NextHopOid) {
        if let Some(entry) = self.neighbors.get_mut(&key) {
            debug!("NeighOrch: updated neighbor {} mac {}", key, mac);
            entry.mac = mac;
            return;
        }

        let entry = NeighborEntry::new(key.clone(), mac, nh_id);
        let (nexthop_res, neighbor_res) = if entry.is_ipv4() {
            (CrmResourceType::Ipv4Nexthop, CrmResourceType::Ipv4Neighbor)
        } else {
            (CrmResourceType::Ipv6Nexthop, CrmResourceType::Ipv6Neighbor)
        };
        {
            let mut crm = self.crm.lock().unwrap();
            crm.inc_used(nexthop_res);
            crm.inc_used(neighbor_res);
        }

        debug!("NeighOrch: added neighbor {} mac {}", key, mac);
        self.neighbors.insert(key, entry);
    }

    /// Removes a neighbour; refused while group instances still reference it.
    pub fn remove_neighbor(&mut self, key: &NextHopKey) -> Result<(), NeighOrchError> {
        let entry = self
            .neighbors
            .get(key)
            .ok_or_else(|| NeighOrchError::NeighborNotFound(key.to_string()))?;

        let refs = entry.ref_count();
        if refs > 0 {
            return Err(NeighOrchError::StillReferenced(key.to_string(), refs));
        }

        let (nexthop_res, neighbor_res) = if entry.is_ipv4() {
            (CrmResourceType::Ipv4Nexthop, CrmResourceType::Ipv4Neighbor)
        } else {
            (CrmResourceType::Ipv6Nexthop, CrmResourceType::Ipv6Neighbor)
        };
        {
            let mut crm = self.crm.lock().unwrap();
            crm.dec_used(nexthop_res);
            crm.dec_used(neighbor_res);
        }

        self.neighbors.remove(key);
        Ok(())
    }

    /// Returns true if a next-hop object exists for this key.
    pub fn has_next_hop(&self, key: &NextHopKey) -> bool {
        self.neighbors.contains_key(key)
    }

    pub fn next_hop_id(&self, key: &NextHopKey) -> Option<NextHopOid> {
        self.neighbors.get(key).map(|e| e.nh_id)
    }

    /// Finds the resolved next-hop key for a bare IP address.
    pub fn resolve_ip(&self, ip: &IpAddress) -> Option<(NextHopKey, MacAddress)> {
        self.neighbors
            .iter()
            .find(|(key, _)| key.ip_address() == ip)
            .map(|(key, entry)| (key.clone(), entry.mac))
    }

    pub fn is_next_hop_if_down(&self, key: &NextHopKey) -> bool {
        self.neighbors
            .get(key)
            .map(|e| e.flags.is_if_down())
            .unwrap_or(false)
    }

    pub fn set_next_hop_if_down(&mut self, key: &NextHopKey, down: bool) {
        if let Some(entry) = self.neighbors.get_mut(key) {
            entry.flags.set_if_down(down);
        }
    }

    pub fn increase_next_hop_ref_count(&mut self, key: &NextHopKey) {
        if self.neighbors.increment_ref(key).is_err() {
            warn!("NeighOrch: ref increment for unknown next-hop {}", key);
        }
    }

    pub fn decrease_next_hop_ref_count(&mut self, key: &NextHopKey) {
        if self.neighbors.decrement_ref(key).is_err() {
            warn!("NeighOrch: ref decrement for unknown or zero next-hop {}", key);
        }
    }

    pub fn next_hop_ref_count(&self, key: &NextHopKey) -> Option<u32> {
        self.neighbors.ref_count(key)
    }
}
