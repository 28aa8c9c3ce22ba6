//! Router-interface table.
//!
//! Degraded fine-grained routes repoint at the router-interface object of
//! one of their declared next-hops so the kernel can drive neighbour
//! re-resolution; this module owns the alias → RIF-id mapping consulted for
//! that.

use fgecmp_sai::RouterInterfaceOid;
use log::debug;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct IntfsEntry {
    pub rif_id: RouterInterfaceOid,
    pub ref_count: u32,
}

/// Interface alias → router-interface id table.
#[derive(Debug, Default)]
pub struct IntfsOrch {
    interfaces: HashMap<String, IntfsEntry>,
}

impl IntfsOrch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_router_interface(&mut self, alias: impl Into<String>, rif_id: RouterInterfaceOid) {
        let alias = alias.into();
        debug!("IntfsOrch: added router interface {} -> {}", alias, rif_id);
        self.interfaces.insert(alias, IntfsEntry { rif_id, ref_count: 0 });
    }

    pub fn remove_router_interface(&mut self, alias: &str) -> Option<IntfsEntry> {
        self.interfaces.remove(alias)
    }

    /// Returns the router-interface id for an alias, if one exists.
    pub fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid> {
        self.interfaces.get(alias).map(|e| e.rif_id)
    }

    pub fn increase_ref_count(&mut self, alias: &str) {
        if let Some(entry) = self.interfaces.get_mut(alias) {
            entry.ref_count += 1;
        }
    }

    pub fn decrease_ref_count(&mut self, alias: &str) {
        if let Some(entry) = self.interfaces.get_mut(alias) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }
}
