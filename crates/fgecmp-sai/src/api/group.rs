//! Fine-grained next-hop group southbound.
//!
//! This is the programmable-group interface the controller drives: a group
//! is created with a configured bucket count, the ASIC reports the count it
//! actually provisioned (possibly rounded up), and one group member is
//! created per bucket carrying its bucket index. Rebalancing rewrites a
//! member's next-hop attribute in place; buckets are never added or removed
//! after group creation.

use crate::error::SaiResult;
use crate::types::{
    NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RawSaiObjectId, RouterInterfaceOid,
    VirtualRouterOid,
};
use async_trait::async_trait;
use fgecmp_types::IpPrefix;

/// Target of a route's next-hop attribute.
///
/// A fine-grained route points either at its ASIC group or, when every bank
/// is down, directly at the router interface so the kernel can drive
/// neighbour re-resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteNextHopId {
    Group(NextHopGroupOid),
    RouterInterface(RouterInterfaceOid),
}

impl RouteNextHopId {
    pub fn as_raw(&self) -> RawSaiObjectId {
        match self {
            RouteNextHopId::Group(oid) => oid.as_raw(),
            RouteNextHopId::RouterInterface(oid) => oid.as_raw(),
        }
    }
}

/// ASIC calls for fine-grained ECMP groups.
///
/// Implementations bind to the real switch-abstraction interface in
/// production; tests substitute a recording fake. All calls are suspension
/// points of the event pump; none may be issued mid-rebalance except
/// through the bucket-write primitive.
#[async_trait]
pub trait FineGrainedGroupApi: Send + Sync {
    /// Creates a fine-grained group with the configured bucket count.
    async fn create_group(&self, configured_size: u32) -> SaiResult<NextHopGroupOid>;

    /// Queries the bucket count the ASIC actually provisioned.
    ///
    /// May be larger than the configured count when the hardware rounds up.
    async fn group_real_size(&self, group: NextHopGroupOid) -> SaiResult<u32>;

    /// Destroys a group. All members must have been removed first.
    async fn remove_group(&self, group: NextHopGroupOid) -> SaiResult<()>;

    /// Creates one group member for the given bucket index.
    async fn create_group_member(
        &self,
        group: NextHopGroupOid,
        next_hop: NextHopOid,
        bucket_index: u32,
    ) -> SaiResult<NextHopGroupMemberOid>;

    /// Rewrites an existing member's next-hop attribute.
    async fn set_member_next_hop(
        &self,
        member: NextHopGroupMemberOid,
        next_hop: NextHopOid,
    ) -> SaiResult<()>;

    /// Removes a group member.
    async fn remove_group_member(&self, member: NextHopGroupMemberOid) -> SaiResult<()>;

    /// Points a route at a group or a router interface.
    async fn set_route_next_hop(
        &self,
        vrf: VirtualRouterOid,
        prefix: &IpPrefix,
        next_hop_id: RouteNextHopId,
    ) -> SaiResult<()>;
}
