//! End-to-end scenarios for the fine-grained controller, driven against
//! the simulated southbound with invariant checks after every step.

use fgecmp_orch_common::{InMemoryWarmRestartTable, KeyOpFieldsValues, Orch, WarmRestartTable};
use fgecmp_sai::api::RouteNextHopId;
use fgecmp_sai::sim::SimFineGrainedGroupApi;
use fgecmp_sai::{NextHopOid, RouterInterfaceOid, VirtualRouterOid};
use fgecmp_types::{IpAddress, IpPrefix, PortOperStatus};
use fgecmpd::crm::CrmResourceType;
use fgecmpd::fg_nhg::{FgNhgOrch, FgNhgOrchCallbacks, FgNhgOrchConfig};
use fgecmpd::route::{NextHopGroupKey, NextHopKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const VRF: VirtualRouterOid = VirtualRouterOid::from_raw_unchecked(0x300);
const RIF: RouterInterfaceOid = RouterInterfaceOid::from_raw_unchecked(0x600);

#[derive(Default)]
struct TestCallbacks {
    neighbors: Mutex<HashMap<NextHopKey, NextHopOid>>,
    rifs: Mutex<HashMap<String, RouterInterfaceOid>>,
    rif_refs: Mutex<HashMap<String, i64>>,
    ports: Mutex<HashMap<String, PortOperStatus>>,
    if_down: Mutex<HashSet<NextHopKey>>,
    ref_counts: Mutex<HashMap<NextHopKey, u32>>,
    resources: Mutex<HashMap<CrmResourceType, i64>>,
    nhg_count: AtomicUsize,
    max_nhg_count: usize,
}

impl TestCallbacks {
    fn new() -> Self {
        Self {
            max_nhg_count: 128,
            ..Default::default()
        }
    }

    fn resolve(&self, nh: &NextHopKey, oid: NextHopOid) {
        self.neighbors.lock().unwrap().insert(nh.clone(), oid);
    }

    fn ref_count(&self, nh: &NextHopKey) -> u32 {
        self.ref_counts.lock().unwrap().get(nh).copied().unwrap_or(0)
    }

    fn rif_ref(&self, alias: &str) -> i64 {
        self.rif_refs.lock().unwrap().get(alias).copied().unwrap_or(0)
    }

    fn resource(&self, resource: CrmResourceType) -> i64 {
        self.resources
            .lock()
            .unwrap()
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }
}

impl FgNhgOrchCallbacks for TestCallbacks {
    fn has_next_hop(&self, nh: &NextHopKey) -> bool {
        self.neighbors.lock().unwrap().contains_key(nh)
    }

    fn next_hop_id(&self, nh: &NextHopKey) -> Option<NextHopOid> {
        self.neighbors.lock().unwrap().get(nh).copied()
    }

    fn is_next_hop_if_down(&self, nh: &NextHopKey) -> bool {
        self.if_down.lock().unwrap().contains(nh)
    }

    fn increase_next_hop_ref_count(&self, nh: &NextHopKey) {
        *self.ref_counts.lock().unwrap().entry(nh.clone()).or_insert(0) += 1;
    }

    fn decrease_next_hop_ref_count(&self, nh: &NextHopKey) {
        if let Some(count) = self.ref_counts.lock().unwrap().get_mut(nh) {
            *count = count.saturating_sub(1);
        }
    }

    fn resolve_neighbor(&self, ip: &IpAddress) -> Option<NextHopKey> {
        self.neighbors
            .lock()
            .unwrap()
            .keys()
            .find(|nh| nh.ip_address() == ip)
            .cloned()
    }

    fn router_intf_id(&self, alias: &str) -> Option<RouterInterfaceOid> {
        self.rifs.lock().unwrap().get(alias).copied()
    }

    fn increase_router_intf_ref_count(&self, alias: &str) {
        *self.rif_refs.lock().unwrap().entry(alias.to_string()).or_insert(0) += 1;
    }

    fn decrease_router_intf_ref_count(&self, alias: &str) {
        *self.rif_refs.lock().unwrap().entry(alias.to_string()).or_insert(0) -= 1;
    }

    fn port_oper_status(&self, alias: &str) -> Option<PortOperStatus> {
        self.ports.lock().unwrap().get(alias).copied()
    }

    fn nhg_count(&self) -> usize {
        self.nhg_count.load(Ordering::SeqCst)
    }

    fn max_nhg_count(&self) -> usize {
        self.max_nhg_count
    }

    fn inc_nhg_count(&self) {
        self.nhg_count.fetch_add(1, Ordering::SeqCst);
    }

    fn dec_nhg_count(&self) {
        self.nhg_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn regular_route_nhg(
        &self,
        _vrf: VirtualRouterOid,
        _prefix: &IpPrefix,
    ) -> Option<NextHopGroupKey> {
        None
    }

    fn resubmit_route(
        &self,
        _vrf: VirtualRouterOid,
        _prefix: &IpPrefix,
        _nhg: &NextHopGroupKey,
    ) -> bool {
        true
    }

    fn increase_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}
    fn decrease_vrf_ref_count(&self, _vrf: VirtualRouterOid) {}

    fn inc_resource(&self, resource: CrmResourceType) {
        *self.resources.lock().unwrap().entry(resource).or_insert(0) += 1;
    }

    fn dec_resource(&self, resource: CrmResourceType) {
        *self.resources.lock().unwrap().entry(resource).or_insert(0) -= 1;
    }
}

struct Harness {
    orch: FgNhgOrch,
    callbacks: Arc<TestCallbacks>,
    api: Arc<SimFineGrainedGroupApi>,
    state: Arc<InMemoryWarmRestartTable>,
}

/// Member 1-6 sit in bank 0 behind Ethernet0, member 7-9 in bank 1 behind
/// Ethernet4; the standard scenario of the even-split test.
fn member_ip(index: u8) -> String {
    format!("10.0.0.{}", index)
}

fn member_alias(index: u8) -> &'static str {
    if index <= 6 {
        "Ethernet0"
    } else {
        "Ethernet4"
    }
}

fn nh_key(index: u8) -> NextHopKey {
    format!("{}@{}", member_ip(index), member_alias(index))
        .parse()
        .unwrap()
}

fn nh_oid(index: u8) -> NextHopOid {
    NextHopOid::from_raw(0x100 + index as u64).unwrap()
}

fn prefix() -> IpPrefix {
    "10.1.1.0/24".parse().unwrap()
}

fn all_members() -> NextHopGroupKey {
    (1..=9).map(nh_key).collect()
}

impl Harness {
    fn new() -> Self {
        Self::with_api(Arc::new(SimFineGrainedGroupApi::new()))
    }

    fn with_api(api: Arc<SimFineGrainedGroupApi>) -> Self {
        Self::with_api_and_state(api, Arc::new(InMemoryWarmRestartTable::new()))
    }

    fn with_api_and_state(
        api: Arc<SimFineGrainedGroupApi>,
        state: Arc<InMemoryWarmRestartTable>,
    ) -> Self {
        let mut orch = FgNhgOrch::new(FgNhgOrchConfig::new(VRF), api.clone(), state.clone());
        let callbacks = Arc::new(TestCallbacks::new());
        callbacks
            .rifs
            .lock()
            .unwrap()
            .insert("Ethernet0".to_string(), RIF);
        orch.set_callbacks(callbacks.clone());
        Self {
            orch,
            callbacks,
            api,
            state,
        }
    }

    /// bucket_size=30; bank 0 holds members 1-6, bank 1 holds 7-9.
    async fn configure_standard_group(&mut self) {
        self.orch.queue_group_task(KeyOpFieldsValues::set(
            "fgnhg_v4",
            vec![("bucket_size".to_string(), "30".to_string())],
        ));
        self.orch.queue_prefix_task(KeyOpFieldsValues::set(
            prefix().to_string(),
            vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
        ));
        for index in 1..=9u8 {
            let bank = if index <= 6 { "0" } else { "1" };
            self.orch.queue_member_task(KeyOpFieldsValues::set(
                member_ip(index),
                vec![
                    ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
                    ("bank".to_string(), bank.to_string()),
                ],
            ));
        }
        self.orch.do_task().await;
    }

    fn resolve_all(&self) {
        for index in 1..=9u8 {
            self.callbacks.resolve(&nh_key(index), nh_oid(index));
        }
    }

    /// Installs the standard route and returns its group handle.
    async fn install_standard_route(&mut self) -> fgecmp_sai::NextHopGroupOid {
        let (next_hop_id, changed) = self
            .orch
            .set_fg_route(VRF, prefix(), all_members())
            .await
            .unwrap();
        assert!(changed);
        match next_hop_id {
            RouteNextHopId::Group(group) => group,
            other => panic!("expected a group handle, got {:?}", other),
        }
    }

    /// Bucket -> owner map as the controller sees it.
    fn controller_layout(&self) -> BTreeMap<u32, NextHopKey> {
        let instance = self.orch.store().instance(VRF, &prefix()).unwrap();
        let mut layout = BTreeMap::new();
        for map in &instance.bucket_maps {
            for (nh, buckets) in map {
                for &bucket in buckets {
                    assert!(
                        layout.insert(bucket, nh.clone()).is_none(),
                        "bucket {} owned twice",
                        bucket
                    );
                }
            }
        }
        layout
    }

    /// Verifies the standing invariants of a materialised instance.
    fn check_invariants(&self, group: fgecmp_sai::NextHopGroupOid) {
        let store = self.orch.store();
        let instance = store.instance(VRF, &prefix()).unwrap();
        let entry = store.group("fgnhg_v4").unwrap();
        let real = entry.real_bucket_size;

        // bank ranges partition the bucket space contiguously from zero
        let mut cursor = 0;
        for range in &entry.bank_ranges {
            assert_eq!(range.start_index, cursor);
            cursor += range.size();
        }
        assert_eq!(cursor, real);

        // every bucket owned exactly once, and the ASIC agrees
        let layout = self.controller_layout();
        assert_eq!(layout.len() as u32, real);
        let asic = self.api.bucket_contents(group);
        assert_eq!(asic.len() as u32, real);
        for (bucket, nh) in &layout {
            let oid = self.callbacks.next_hop_id(nh).unwrap();
            assert_eq!(asic.get(bucket), Some(&oid.as_raw()), "bucket {}", bucket);
        }

        // per-bank balance: bucket counts differ by at most one
        for map in &instance.bucket_maps {
            if map.is_empty() {
                continue;
            }
            let sizes: Vec<usize> = map.values().map(|b| b.len()).collect();
            let min = sizes.iter().min().unwrap();
            let max = sizes.iter().max().unwrap();
            assert!(max - min <= 1, "unbalanced bank: {:?}", sizes);
        }

        // active set fidelity: active iff owning at least one bucket
        let owners: HashSet<&NextHopKey> = layout.values().collect();
        for nh in &instance.active_nexthops {
            assert!(owners.contains(nh), "{} active without buckets", nh);
        }
        for nh in &owners {
            assert!(
                instance.active_nexthops.contains(*nh),
                "{} owns buckets but is not active",
                nh
            );
        }

        // checkpoint parity: one state row field per programmed bucket
        let row = self.state.get(&prefix().to_string()).unwrap();
        assert_eq!(row.len() as u32, real);
        for (field, value) in &row {
            let bucket: u32 = field.parse().unwrap();
            assert_eq!(layout.get(&bucket).unwrap().to_string(), *value);
        }

        // reference counts track active membership
        for nh in &instance.active_nexthops {
            assert_eq!(self.callbacks.ref_count(nh), 1, "refcount of {}", nh);
        }
    }
}

#[tokio::test]
async fn test_basic_even_split() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    let store = harness.orch.store();
    let entry = store.group("fgnhg_v4").unwrap();
    assert_eq!(entry.real_bucket_size, 30);

    // bank 0 owns buckets 0-19, bank 1 owns 20-29
    assert_eq!(entry.bank_ranges.len(), 2);
    assert_eq!(entry.bank_ranges[0].indices(), 0..20);
    assert_eq!(entry.bank_ranges[1].indices(), 20..30);

    let instance = store.instance(VRF, &prefix()).unwrap();
    assert_eq!(instance.active_nexthops.len(), 9);
    assert_eq!(instance.member_handles.len(), 30);

    // bank 0: six members share 20 buckets, so counts are 3 or 4
    for index in 1..=6u8 {
        let count = instance.bucket_count_of(&nh_key(index));
        assert!((3..=4).contains(&count), "member {} owns {}", index, count);
    }
    // bank 1: three members share 10 buckets
    for index in 7..=9u8 {
        let count = instance.bucket_count_of(&nh_key(index));
        assert!((3..=4).contains(&count), "member {} owns {}", index, count);
    }

    assert_eq!(harness.callbacks.resource(CrmResourceType::NexthopGroup), 1);
    assert_eq!(
        harness.callbacks.resource(CrmResourceType::NexthopGroupMember),
        30
    );

    harness.check_invariants(group);
}

#[tokio::test]
async fn test_symmetric_swap_touches_only_swapped_buckets() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    // add member 10 to bank 0, then redeclare the route with member 3
    // replaced by member 10
    harness.orch.queue_member_task(KeyOpFieldsValues::set(
        member_ip(10),
        vec![
            ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
            ("bank".to_string(), "0".to_string()),
        ],
    ));
    harness.orch.do_task().await;
    harness.callbacks.resolve(&nh_key(10), nh_oid(10));

    let before = harness.controller_layout();
    let swapped_out = nh_key(3);
    let swapped_in = nh_key(10);
    let old_buckets: HashSet<u32> = before
        .iter()
        .filter(|(_, nh)| **nh == swapped_out)
        .map(|(b, _)| *b)
        .collect();
    assert!(!old_buckets.is_empty());

    let nhs: NextHopGroupKey = (1..=10u8)
        .filter(|i| *i != 3)
        .map(nh_key)
        .collect();
    let (_, _) = harness.orch.set_fg_route(VRF, prefix(), nhs).await.unwrap();

    let after = harness.controller_layout();
    for (bucket, owner) in &after {
        if old_buckets.contains(bucket) {
            assert_eq!(*owner, swapped_in, "bucket {} should have swapped", bucket);
        } else {
            assert_eq!(owner, before.get(bucket).unwrap(), "bucket {} moved", bucket);
        }
    }

    harness.check_invariants(group);
    assert_eq!(harness.callbacks.ref_count(&swapped_out), 0);
    assert_eq!(harness.callbacks.ref_count(&swapped_in), 1);
}

#[tokio::test]
async fn test_net_delete_redistributes_round_robin() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    let before = harness.controller_layout();
    let down = nh_key(6);
    let down_buckets: HashSet<u32> = before
        .iter()
        .filter(|(_, nh)| **nh == down)
        .map(|(b, _)| *b)
        .collect();

    harness.orch.on_next_hop_down(&down).await.unwrap();

    let after = harness.controller_layout();
    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert_eq!(instance.active_nexthops.len(), 8);
    assert!(!instance.active_nexthops.contains(&down));

    // only the downed member's buckets changed hands, each to a bank 0
    // survivor; bank 1 untouched
    for (bucket, owner) in &after {
        if down_buckets.contains(bucket) {
            let index: u8 = member_ip_index(owner);
            assert!((1..=5).contains(&index), "bucket {} went to {}", bucket, owner);
        } else {
            assert_eq!(owner, before.get(bucket).unwrap(), "bucket {} moved", bucket);
        }
    }

    harness.check_invariants(group);
    assert_eq!(harness.callbacks.ref_count(&down), 0);
}

#[tokio::test]
async fn test_minimal_perturbation_down_then_up() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    let initial = harness.controller_layout();
    let target = nh_key(6);
    let old_buckets: HashSet<u32> = initial
        .iter()
        .filter(|(_, nh)| **nh == target)
        .map(|(b, _)| *b)
        .collect();

    harness.orch.on_next_hop_down(&target).await.unwrap();
    harness.orch.on_next_hop_up(&target).await.unwrap();

    let after = harness.controller_layout();
    let new_buckets: HashSet<u32> = after
        .iter()
        .filter(|(_, nh)| **nh == target)
        .map(|(b, _)| *b)
        .collect();

    let changed: HashSet<u32> = initial
        .iter()
        .filter(|&(b, nh)| after.get(b) != Some(nh))
        .map(|(b, _)| *b)
        .collect();

    let union: HashSet<u32> = old_buckets.union(&new_buckets).copied().collect();
    assert!(
        changed.is_subset(&union),
        "changed buckets {:?} outside {:?}",
        changed,
        union
    );
    assert!(changed.len() <= 2 * old_buckets.len());

    harness.check_invariants(group);
}

#[tokio::test]
async fn test_bank_down_delegates_to_active_bank() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    let before = harness.controller_layout();
    let bank0_before: BTreeMap<u32, NextHopKey> =
        before.iter().filter(|(b, _)| **b < 20).map(|(b, nh)| (*b, nh.clone())).collect();

    for index in 7..=9u8 {
        harness.orch.on_next_hop_down(&nh_key(index)).await.unwrap();
    }

    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert_eq!(instance.inactive_to_active.get(&1), Some(&0));
    assert_eq!(instance.active_nexthops.len(), 6);

    let after = harness.controller_layout();
    // bank 1's range is now covered by bank 0 members
    for bucket in 20..30u32 {
        let owner = after.get(&bucket).unwrap();
        let index = member_ip_index(owner);
        assert!((1..=6).contains(&index), "bucket {} owned by {}", bucket, owner);
    }
    // bank 0's own range did not move
    for (bucket, owner) in &bank0_before {
        assert_eq!(after.get(bucket).unwrap(), owner, "bucket {} moved", bucket);
    }

    harness.check_invariants(group);

    // one bank 1 member recovering reclaims the whole range
    harness.orch.on_next_hop_up(&nh_key(7)).await.unwrap();

    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert_eq!(instance.inactive_to_active.get(&1), Some(&1));

    let recovered = harness.controller_layout();
    for bucket in 20..30u32 {
        assert_eq!(*recovered.get(&bucket).unwrap(), nh_key(7));
    }
    for (bucket, owner) in &bank0_before {
        assert_eq!(recovered.get(bucket).unwrap(), owner);
    }

    harness.check_invariants(group);
}

#[tokio::test]
async fn test_all_banks_down_degrades_to_interface_route() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let _group = harness.install_standard_route().await;

    for index in 1..=9u8 {
        harness.orch.on_next_hop_down(&nh_key(index)).await.unwrap();
    }

    // group torn down, route handed to the router interface
    assert_eq!(harness.api.group_count(), 0);
    assert_eq!(harness.callbacks.nhg_count(), 0);
    assert_eq!(
        harness.api.route_target(VRF, &prefix()),
        Some(RIF.as_raw())
    );
    assert!(harness.state.get(&prefix().to_string()).is_none());

    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert!(instance.points_to_rif());
    assert!(instance.active_nexthops.is_empty());
    assert!(instance.member_handles.is_empty());

    // the degraded route holds a reference on the router interface
    assert_eq!(harness.callbacks.rif_ref("Ethernet0"), 1);

    for index in 1..=9u8 {
        assert_eq!(harness.callbacks.ref_count(&nh_key(index)), 0);
    }

    // a single member recovering re-materialises a fresh group
    harness.orch.on_next_hop_up(&nh_key(1)).await.unwrap();

    assert_eq!(harness.api.group_count(), 1);
    // re-promotion releases the router-interface reference
    assert_eq!(harness.callbacks.rif_ref("Ethernet0"), 0);
    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert!(!instance.points_to_rif());
    assert_eq!(instance.member_handles.len(), 30);
    assert_eq!(instance.active_nexthops.len(), 1);

    // every bucket points at the lone live member, bank 1 delegated
    let layout = harness.controller_layout();
    assert_eq!(layout.len(), 30);
    for owner in layout.values() {
        assert_eq!(*owner, nh_key(1));
    }
    assert_eq!(instance.inactive_to_active.get(&1), Some(&0));

    let group = instance.group_id().unwrap();
    assert_eq!(harness.api.route_target(VRF, &prefix()), Some(group.as_raw()));
    harness.check_invariants(group);
}

#[tokio::test]
async fn test_route_removal_releases_everything() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    harness.install_standard_route().await;

    harness.orch.remove_fg_route(VRF, &prefix()).await.unwrap();

    assert_eq!(harness.api.group_count(), 0);
    assert!(harness.orch.store().instance(VRF, &prefix()).is_none());
    assert!(harness.state.get(&prefix().to_string()).is_none());
    assert_eq!(harness.callbacks.resource(CrmResourceType::NexthopGroup), 0);
    assert_eq!(
        harness.callbacks.resource(CrmResourceType::NexthopGroupMember),
        0
    );
    for index in 1..=9u8 {
        assert_eq!(harness.callbacks.ref_count(&nh_key(index)), 0);
    }
}

#[tokio::test]
async fn test_warm_restart_reproduces_layout() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    harness.install_standard_route().await;

    let checkpoint = harness.state.get(&prefix().to_string()).unwrap();
    let original_layout = harness.controller_layout();

    // restart: fresh controller and ASIC, same state database
    let api2 = Arc::new(SimFineGrainedGroupApi::new());
    let mut restarted = Harness::with_api_and_state(api2, harness.state.clone());

    assert!(restarted.orch.bake());
    // the checkpoint row is consumed by recovery
    assert!(restarted.state.get(&prefix().to_string()).is_none());

    restarted.configure_standard_group().await;
    // neighbours resolve in a different order than before the restart
    for index in (1..=9u8).rev() {
        restarted.callbacks.resolve(&nh_key(index), nh_oid(index));
    }

    let group = restarted.install_standard_route().await;

    // bit-for-bit the same bucket layout
    assert_eq!(restarted.controller_layout(), original_layout);

    // and byte-identical rewritten state rows
    let rewritten = restarted.state.get(&prefix().to_string()).unwrap();
    assert_eq!(rewritten, checkpoint);

    restarted.check_invariants(group);
}

#[tokio::test]
async fn test_warm_restart_recovers_bank_delegation() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    harness.install_standard_route().await;

    // bank 1 fully down, its range delegated to bank 0
    for index in 7..=9u8 {
        harness.orch.on_next_hop_down(&nh_key(index)).await.unwrap();
    }
    let degraded_layout = harness.controller_layout();

    let api2 = Arc::new(SimFineGrainedGroupApi::new());
    let mut restarted = Harness::with_api_and_state(api2, harness.state.clone());
    assert!(restarted.orch.bake());
    restarted.configure_standard_group().await;
    // only the bank 0 neighbours are back after the restart
    for index in 1..=6u8 {
        restarted.callbacks.resolve(&nh_key(index), nh_oid(index));
    }

    let group = restarted.install_standard_route().await;

    assert_eq!(restarted.controller_layout(), degraded_layout);
    let instance = restarted.orch.store().instance(VRF, &prefix()).unwrap();
    assert_eq!(instance.inactive_to_active.get(&1), Some(&0));

    restarted.check_invariants(group);
}

#[tokio::test]
async fn test_real_bucket_size_rounding() {
    let api = Arc::new(SimFineGrainedGroupApi::with_real_size_rounding(16));
    let mut harness = Harness::with_api(api);
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    // the ASIC rounded 30 up to 32; the layout covers all of it
    let entry = harness.orch.store().group("fgnhg_v4").unwrap();
    assert_eq!(entry.real_bucket_size, 32);
    assert_eq!(harness.api.member_count(group), 32);

    harness.check_invariants(group);
}

#[tokio::test]
async fn test_link_pinned_member_follows_port_state() {
    let mut harness = Harness::new();

    harness.orch.queue_group_task(KeyOpFieldsValues::set(
        "fgnhg_v4",
        vec![("bucket_size".to_string(), "12".to_string())],
    ));
    harness.orch.queue_prefix_task(KeyOpFieldsValues::set(
        prefix().to_string(),
        vec![("FG_NHG".to_string(), "fgnhg_v4".to_string())],
    ));

    harness
        .callbacks
        .ports
        .lock()
        .unwrap()
        .insert("Ethernet8".to_string(), PortOperStatus::Down);

    // member 1 is free, member 2 is pinned to Ethernet8 which is down
    harness.orch.queue_member_task(KeyOpFieldsValues::set(
        member_ip(1),
        vec![
            ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
            ("bank".to_string(), "0".to_string()),
        ],
    ));
    harness.orch.queue_member_task(KeyOpFieldsValues::set(
        member_ip(2),
        vec![
            ("FG_NHG".to_string(), "fgnhg_v4".to_string()),
            ("bank".to_string(), "0".to_string()),
            ("link".to_string(), "Ethernet8".to_string()),
        ],
    ));
    harness.orch.do_task().await;

    harness.callbacks.resolve(&nh_key(1), nh_oid(1));
    harness.callbacks.resolve(&nh_key(2), nh_oid(2));

    let nhs: NextHopGroupKey = [nh_key(1), nh_key(2)].into_iter().collect();
    harness.orch.set_fg_route(VRF, prefix(), nhs).await.unwrap();

    // the pinned member was filtered out while its link is down
    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert!(instance.active_nexthops.contains(&nh_key(1)));
    assert!(!instance.active_nexthops.contains(&nh_key(2)));

    // link up activates it
    harness
        .orch
        .on_port_oper_change("Ethernet8", PortOperStatus::Up)
        .await
        .unwrap();
    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert!(instance.active_nexthops.contains(&nh_key(2)));

    // link down deactivates it again
    harness
        .orch
        .on_port_oper_change("Ethernet8", PortOperStatus::Down)
        .await
        .unwrap();
    let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
    assert!(!instance.active_nexthops.contains(&nh_key(2)));
    assert!(instance.active_nexthops.contains(&nh_key(1)));
}

#[tokio::test]
async fn test_random_churn_preserves_invariants() {
    let mut harness = Harness::new();
    harness.configure_standard_group().await;
    harness.resolve_all();
    let group = harness.install_standard_route().await;

    // a fixed pseudo-random schedule of up/down events; every step must
    // leave the instance balanced and consistent
    let mut down: HashSet<u8> = HashSet::new();
    let mut seed = 0x2545f491u64;
    for _ in 0..200 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let index = (seed % 9) as u8 + 1;

        if down.contains(&index) {
            harness.orch.on_next_hop_up(&nh_key(index)).await.unwrap();
            down.remove(&index);
        } else if down.len() < 8 {
            harness.orch.on_next_hop_down(&nh_key(index)).await.unwrap();
            down.insert(index);
        } else {
            continue;
        }

        let instance = harness.orch.store().instance(VRF, &prefix()).unwrap();
        assert_eq!(instance.active_nexthops.len(), 9 - down.len());
        harness.check_invariants(group);
    }
}

fn member_ip_index(nh: &NextHopKey) -> u8 {
    nh.ip_address()
        .to_string()
        .rsplit('.')
        .next()
        .unwrap()
        .parse()
        .unwrap()
}
