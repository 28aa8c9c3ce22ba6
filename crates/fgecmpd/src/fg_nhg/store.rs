//! Authoritative in-memory model of configured groups and live instances.
//!
//! Ownership: a group instance is owned by its `(vrf, prefix)` slot, a
//! group declaration by its name. Prefixes and members reference their
//! group by name through the two indexes; no back-pointers exist, so
//! deleting a group (gated on empty prefix and member lists) can never
//! leave a dangling reference.

use super::types::{FgGroupInstance, FgNhgEntry};
use crate::route::NextHopKey;
use fgecmp_sai::VirtualRouterOid;
use fgecmp_types::{IpAddress, IpPrefix};
use std::collections::{BTreeMap, HashMap};

/// Group specs, live instances, and the prefix/next-hop indexes.
#[derive(Debug, Default)]
pub struct FgNhgStore {
    groups: HashMap<String, FgNhgEntry>,
    route_tables: HashMap<VirtualRouterOid, BTreeMap<IpPrefix, FgGroupInstance>>,
    prefix_to_group: HashMap<IpPrefix, String>,
    nexthop_to_group: HashMap<IpAddress, String>,
}

impl FgNhgStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while at least one fine-grained group is configured.
    pub fn is_configured(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn group(&self, name: &str) -> Option<&FgNhgEntry> {
        self.groups.get(name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut FgNhgEntry> {
        self.groups.get_mut(name)
    }

    pub fn insert_group(&mut self, entry: FgNhgEntry) {
        self.groups.insert(entry.name.clone(), entry);
    }

    pub fn remove_group(&mut self, name: &str) -> Option<FgNhgEntry> {
        self.groups.remove(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &FgNhgEntry)> {
        self.groups.iter()
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = (&String, &mut FgNhgEntry)> {
        self.groups.iter_mut()
    }

    pub fn bind_prefix(&mut self, prefix: IpPrefix, group_name: impl Into<String>) {
        self.prefix_to_group.insert(prefix, group_name.into());
    }

    pub fn unbind_prefix(&mut self, prefix: &IpPrefix) {
        self.prefix_to_group.remove(prefix);
    }

    pub fn group_name_for_prefix(&self, prefix: &IpPrefix) -> Option<&String> {
        self.prefix_to_group.get(prefix)
    }

    pub fn bind_nexthop(&mut self, ip: IpAddress, group_name: impl Into<String>) {
        self.nexthop_to_group.insert(ip, group_name.into());
    }

    pub fn unbind_nexthop(&mut self, ip: &IpAddress) {
        self.nexthop_to_group.remove(ip);
    }

    pub fn group_name_for_nexthop(&self, ip: &IpAddress) -> Option<&String> {
        self.nexthop_to_group.get(ip)
    }

    pub fn has_instance(&self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> bool {
        self.route_tables
            .get(&vrf)
            .map(|table| table.contains_key(prefix))
            .unwrap_or(false)
    }

    pub fn instance(&self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> Option<&FgGroupInstance> {
        self.route_tables.get(&vrf).and_then(|table| table.get(prefix))
    }

    pub fn instance_mut(
        &mut self,
        vrf: VirtualRouterOid,
        prefix: &IpPrefix,
    ) -> Option<&mut FgGroupInstance> {
        self.route_tables
            .get_mut(&vrf)
            .and_then(|table| table.get_mut(prefix))
    }

    /// Removes an instance from its slot for exclusive mutation.
    ///
    /// The (possibly empty) per-VRF table is left in place so the caller
    /// can put the instance back; see [`cleanup_vrf`](Self::cleanup_vrf).
    pub fn take_instance(
        &mut self,
        vrf: VirtualRouterOid,
        prefix: &IpPrefix,
    ) -> Option<FgGroupInstance> {
        self.route_tables
            .get_mut(&vrf)
            .and_then(|table| table.remove(prefix))
    }

    /// Inserts an instance; returns true when this created the VRF table.
    pub fn put_instance(
        &mut self,
        vrf: VirtualRouterOid,
        prefix: IpPrefix,
        instance: FgGroupInstance,
    ) -> bool {
        let created = !self.route_tables.contains_key(&vrf);
        self.route_tables
            .entry(vrf)
            .or_default()
            .insert(prefix, instance);
        created
    }

    /// Drops an empty VRF table; returns true when one was removed.
    pub fn cleanup_vrf(&mut self, vrf: VirtualRouterOid) -> bool {
        match self.route_tables.get(&vrf) {
            Some(table) if table.is_empty() => {
                self.route_tables.remove(&vrf);
                true
            }
            _ => false,
        }
    }

    /// All `(vrf, prefix)` slots whose declared next-hop set contains `nh`.
    pub fn instances_containing(&self, nh: &NextHopKey) -> Vec<(VirtualRouterOid, IpPrefix)> {
        let mut result = Vec::new();
        for (vrf, table) in &self.route_tables {
            for (prefix, instance) in table {
                if instance.nhg_key.contains(nh) {
                    result.push((*vrf, *prefix));
                }
            }
        }
        result
    }

    /// All live instances, for diagnostics and tests.
    pub fn instances(
        &self,
    ) -> impl Iterator<Item = (VirtualRouterOid, &IpPrefix, &FgGroupInstance)> {
        self.route_tables
            .iter()
            .flat_map(|(vrf, table)| table.iter().map(move |(p, i)| (*vrf, p, i)))
    }
}
