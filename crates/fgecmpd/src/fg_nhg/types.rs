//! Fine-grained group data model.

use crate::route::{NextHopGroupKey, NextHopKey};
use fgecmp_sai::api::RouteNextHopId;
use fgecmp_sai::{NextHopGroupMemberOid, NextHopGroupOid, RouterInterfaceOid};
use fgecmp_types::{IpAddress, IpPrefix, PortOperStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Bank identifier. Banks are dense from 0 up to the highest configured
/// bank index.
pub type Bank = u32;

/// Index into a group's hash-bucket array.
pub type BucketIndex = u32;

/// Per-bank mapping from next-hop to the buckets it currently owns.
///
/// Bucket lists keep assignment order; the net-add phase steals from the
/// tail so the most recently gained buckets move first.
pub type BankNextHopMap = BTreeMap<NextHopKey, Vec<BucketIndex>>;

/// Contiguous bucket range owned by one bank.
///
/// Computed once per materialisation; a bank whose member count is zero
/// gets a zero-size range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankRange {
    pub start_index: BucketIndex,
    pub size: u32,
}

impl BankRange {
    pub fn new(start_index: BucketIndex, size: u32) -> Self {
        Self { start_index, size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bucket indices of this range in ascending order.
    pub fn indices(&self) -> std::ops::Range<BucketIndex> {
        self.start_index..self.start_index + self.size
    }
}

/// How routes are matched to a fine-grained group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FgMatchMode {
    /// Prefixes are attached to the group explicitly.
    #[default]
    RouteBased,
    /// Any route whose next-hops all belong to the group is fine-grained.
    NexthopBased,
}

/// Per-member configuration and link-tracking state.
#[derive(Debug, Clone)]
pub struct FgNextHopInfo {
    pub bank: Bank,
    /// Port this member is pinned to, when the operator configured one.
    pub link: Option<String>,
    /// Oper state of the pinned port; meaningless when `link` is `None`.
    pub link_oper_state: PortOperStatus,
}

impl FgNextHopInfo {
    pub fn new(bank: Bank) -> Self {
        Self {
            bank,
            link: None,
            link_oper_state: PortOperStatus::Up,
        }
    }
}

/// Operator-declared fine-grained group.
#[derive(Debug, Clone)]
pub struct FgNhgEntry {
    pub name: String,
    pub configured_bucket_size: u32,
    /// Bucket count the ASIC actually provisioned; set at materialisation.
    pub real_bucket_size: u32,
    pub match_mode: FgMatchMode,
    /// Member table: next-hop IP to bank and link info.
    pub next_hops: BTreeMap<IpAddress, FgNextHopInfo>,
    /// Link name to the member IPs pinned to it.
    pub links: HashMap<String, Vec<IpAddress>>,
    /// Prefixes attached to this group (route-based mode).
    pub prefixes: Vec<IpPrefix>,
    /// Per-bank bucket ranges; recomputed at each materialisation.
    pub bank_ranges: Vec<BankRange>,
}

impl FgNhgEntry {
    pub fn new(name: impl Into<String>, configured_bucket_size: u32, match_mode: FgMatchMode) -> Self {
        Self {
            name: name.into(),
            configured_bucket_size,
            real_bucket_size: 0,
            match_mode,
            next_hops: BTreeMap::new(),
            links: HashMap::new(),
            prefixes: Vec::new(),
            bank_ranges: Vec::new(),
        }
    }

    /// Number of banks: one past the highest configured bank index.
    pub fn num_banks(&self) -> u32 {
        self.next_hops
            .values()
            .map(|info| info.bank + 1)
            .max()
            .unwrap_or(0)
    }

    /// Member count per bank, dense over `0..num_banks()`.
    pub fn members_per_bank(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.num_banks() as usize];
        for info in self.next_hops.values() {
            counts[info.bank as usize] += 1;
        }
        counts
    }

    /// Bank of a member IP, if it is configured.
    pub fn bank_of(&self, ip: &IpAddress) -> Option<Bank> {
        self.next_hops.get(ip).map(|info| info.bank)
    }

    /// Drops one IP from a link's pinned-member list.
    pub fn remove_link_mapping(&mut self, link: &str, ip: &IpAddress) {
        match self.links.get_mut(link) {
            Some(ips) => {
                ips.retain(|candidate| candidate != ip);
                if ips.is_empty() {
                    self.links.remove(link);
                }
            }
            None => {
                log::warn!("Unexpected case where structs are out of sync for {}", link);
            }
        }
    }
}

/// Per-bank change set driving one rebalance call.
#[derive(Debug, Clone, Default)]
pub struct BankMemberChanges {
    pub nhs_to_add: Vec<NextHopKey>,
    pub nhs_to_del: Vec<NextHopKey>,
    pub active_nhs: Vec<NextHopKey>,
}

/// Live ASIC group state for one `(vrf, prefix)`.
#[derive(Debug, Clone)]
pub struct FgGroupInstance {
    /// The object the route points at: the group, or a router interface
    /// while degraded.
    pub next_hop_id: RouteNextHopId,
    /// Group-member handles indexed by bucket.
    pub member_handles: Vec<NextHopGroupMemberOid>,
    /// Next-hops currently owning at least one bucket.
    pub active_nexthops: BTreeSet<NextHopKey>,
    /// Per-bank bucket ownership.
    pub bucket_maps: Vec<BankNextHopMap>,
    /// Delegation of inactive banks to the active bank occupying them.
    pub inactive_to_active: BTreeMap<Bank, Bank>,
    /// Full declared next-hop set of the route.
    pub nhg_key: NextHopGroupKey,
    /// Interface whose router-interface object the route points at while
    /// degraded; holds that interface's reference count.
    pub rif_alias: Option<String>,
}

impl FgGroupInstance {
    pub fn new() -> Self {
        Self {
            next_hop_id: RouteNextHopId::Group(NextHopGroupOid::NULL),
            member_handles: Vec::new(),
            active_nexthops: BTreeSet::new(),
            bucket_maps: Vec::new(),
            inactive_to_active: BTreeMap::new(),
            nhg_key: NextHopGroupKey::new(),
            rif_alias: None,
        }
    }

    /// True while the route points at a router interface instead of a group.
    pub fn points_to_rif(&self) -> bool {
        matches!(self.next_hop_id, RouteNextHopId::RouterInterface(_))
    }

    /// The ASIC group handle, when one exists.
    pub fn group_id(&self) -> Option<NextHopGroupOid> {
        match self.next_hop_id {
            RouteNextHopId::Group(oid) if oid.is_valid() => Some(oid),
            _ => None,
        }
    }

    /// Grows the per-bank maps to cover `num_banks` banks.
    pub fn ensure_banks(&mut self, num_banks: usize) {
        while self.bucket_maps.len() < num_banks {
            self.bucket_maps.push(BankNextHopMap::new());
        }
    }

    /// Total buckets currently owned by a next-hop across all banks.
    pub fn bucket_count_of(&self, nh: &NextHopKey) -> usize {
        self.bucket_maps
            .iter()
            .filter_map(|m| m.get(nh))
            .map(|b| b.len())
            .sum()
    }

    /// Marks a next-hop active. Active membership implies bucket ownership.
    pub fn activate(&mut self, nh: NextHopKey) {
        debug_assert!(
            self.bucket_count_of(&nh) > 0,
            "activating {} with no buckets",
            nh
        );
        self.active_nexthops.insert(nh);
    }

    /// Marks a next-hop inactive.
    ///
    /// The next-hop may still own buckets in a delegated bank at this
    /// point; those are rewritten when the delegated bank's turn comes in
    /// the same pass.
    pub fn deactivate(&mut self, nh: &NextHopKey) {
        self.active_nexthops.remove(nh);
    }

    /// Current owner of a bucket, for diagnostics and tests.
    pub fn owner_of(&self, index: BucketIndex) -> Option<(Bank, &NextHopKey)> {
        for (bank, map) in self.bucket_maps.iter().enumerate() {
            for (nh, buckets) in map {
                if buckets.contains(&index) {
                    return Some((bank as Bank, nh));
                }
            }
        }
        None
    }

    /// Resets the instance to degraded router-interface state.
    pub fn clear_to_rif(&mut self, rif: RouterInterfaceOid, alias: String) {
        self.next_hop_id = RouteNextHopId::RouterInterface(rif);
        self.member_handles.clear();
        self.active_nexthops.clear();
        self.bucket_maps.clear();
        self.inactive_to_active.clear();
        self.rif_alias = Some(alias);
    }
}

impl Default for FgGroupInstance {
    fn default() -> Self {
        Self::new()
    }
}
