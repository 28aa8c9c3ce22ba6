//! In-memory southbound for simulator platforms and tests.
//!
//! Models just enough of the ASIC to exercise the controller: object-id
//! allocation, group/member bookkeeping with per-member bucket indices,
//! and route next-hop targets. Inspection methods expose programmed state
//! so tests can compare bucket contents directly.

use crate::api::{FineGrainedGroupApi, RouteNextHopId};
use crate::error::{SaiError, SaiResult, SaiStatus};
use crate::types::{
    NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RawSaiObjectId, VirtualRouterOid,
};
use async_trait::async_trait;
use fgecmp_types::IpPrefix;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug)]
struct SimGroup {
    real_size: u32,
    member_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct SimMember {
    group: RawSaiObjectId,
    bucket_index: u32,
    next_hop: RawSaiObjectId,
}

#[derive(Debug, Default)]
struct SimState {
    next_oid: RawSaiObjectId,
    groups: HashMap<RawSaiObjectId, SimGroup>,
    members: HashMap<RawSaiObjectId, SimMember>,
    routes: HashMap<(RawSaiObjectId, String), RawSaiObjectId>,
    fail_member_creates: bool,
}

/// Simulated fine-grained group ASIC.
#[derive(Debug, Default)]
pub struct SimFineGrainedGroupApi {
    state: Mutex<SimState>,
    /// When set, provisioned group sizes round up to this multiple,
    /// mimicking hardware that over-allocates bucket memory.
    round_up_to: Option<u32>,
}

impl SimFineGrainedGroupApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulates hardware that rounds the configured size up to a multiple.
    pub fn with_real_size_rounding(round_up_to: u32) -> Self {
        Self {
            state: Mutex::default(),
            round_up_to: Some(round_up_to),
        }
    }

    /// Makes every subsequent member creation fail, for teardown tests.
    pub fn set_fail_member_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_member_creates = fail;
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    pub fn member_count(&self, group: NextHopGroupOid) -> usize {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(&group.as_raw())
            .map(|g| g.member_count)
            .unwrap_or(0)
    }

    /// The programmed bucket → next-hop mapping of a group.
    pub fn bucket_contents(&self, group: NextHopGroupOid) -> BTreeMap<u32, RawSaiObjectId> {
        let state = self.state.lock().unwrap();
        state
            .members
            .values()
            .filter(|m| m.group == group.as_raw())
            .map(|m| (m.bucket_index, m.next_hop))
            .collect()
    }

    /// The object a route currently points at.
    pub fn route_target(&self, vrf: VirtualRouterOid, prefix: &IpPrefix) -> Option<RawSaiObjectId> {
        self.state
            .lock()
            .unwrap()
            .routes
            .get(&(vrf.as_raw(), prefix.to_string()))
            .copied()
    }
}

#[async_trait]
impl FineGrainedGroupApi for SimFineGrainedGroupApi {
    async fn create_group(&self, configured_size: u32) -> SaiResult<NextHopGroupOid> {
        if configured_size == 0 {
            return Err(SaiError::invalid_parameter("configured size is zero"));
        }

        let mut state = self.state.lock().unwrap();
        state.next_oid += 1;
        let oid = state.next_oid;

        let real_size = match self.round_up_to {
            Some(multiple) if configured_size % multiple != 0 => {
                (configured_size / multiple + 1) * multiple
            }
            _ => configured_size,
        };

        state.groups.insert(
            oid,
            SimGroup {
                real_size,
                member_count: 0,
            },
        );
        Ok(NextHopGroupOid::from_raw_unchecked(oid))
    }

    async fn group_real_size(&self, group: NextHopGroupOid) -> SaiResult<u32> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(&group.as_raw())
            .map(|g| g.real_size)
            .ok_or_else(|| SaiError::from_status(SaiStatus::ItemNotFound))
    }

    async fn remove_group(&self, group: NextHopGroupOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .groups
            .get(&group.as_raw())
            .ok_or_else(|| SaiError::from_status(SaiStatus::ItemNotFound))?;
        if entry.member_count > 0 {
            return Err(SaiError::from_status(SaiStatus::ObjectInUse));
        }
        state.groups.remove(&group.as_raw());
        Ok(())
    }

    async fn create_group_member(
        &self,
        group: NextHopGroupOid,
        next_hop: NextHopOid,
        bucket_index: u32,
    ) -> SaiResult<NextHopGroupMemberOid> {
        let mut state = self.state.lock().unwrap();
        if state.fail_member_creates {
            return Err(SaiError::from_status(SaiStatus::InsufficientResources));
        }
        if !state.groups.contains_key(&group.as_raw()) {
            return Err(SaiError::from_status(SaiStatus::ItemNotFound));
        }
        if next_hop.is_null() {
            return Err(SaiError::invalid_parameter("null next-hop id"));
        }

        state.next_oid += 1;
        let oid = state.next_oid;
        state.members.insert(
            oid,
            SimMember {
                group: group.as_raw(),
                bucket_index,
                next_hop: next_hop.as_raw(),
            },
        );
        if let Some(g) = state.groups.get_mut(&group.as_raw()) {
            g.member_count += 1;
        }
        Ok(NextHopGroupMemberOid::from_raw_unchecked(oid))
    }

    async fn set_member_next_hop(
        &self,
        member: NextHopGroupMemberOid,
        next_hop: NextHopOid,
    ) -> SaiResult<()> {
        if next_hop.is_null() {
            return Err(SaiError::invalid_parameter("null next-hop id"));
        }
        let mut state = self.state.lock().unwrap();
        let entry = state
            .members
            .get_mut(&member.as_raw())
            .ok_or_else(|| SaiError::from_status(SaiStatus::ItemNotFound))?;
        entry.next_hop = next_hop.as_raw();
        Ok(())
    }

    async fn remove_group_member(&self, member: NextHopGroupMemberOid) -> SaiResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .members
            .remove(&member.as_raw())
            .ok_or_else(|| SaiError::from_status(SaiStatus::ItemNotFound))?;
        if let Some(g) = state.groups.get_mut(&entry.group) {
            g.member_count -= 1;
        }
        Ok(())
    }

    async fn set_route_next_hop(
        &self,
        vrf: VirtualRouterOid,
        prefix: &IpPrefix,
        next_hop_id: RouteNextHopId,
    ) -> SaiResult<()> {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert((vrf.as_raw(), prefix.to_string()), next_hop_id.as_raw());
        Ok(())
    }
}
