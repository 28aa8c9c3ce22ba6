//! Tracked resource kinds.

use std::fmt;

/// ASIC resources whose usage this daemon accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrmResourceType {
    NexthopGroup,
    NexthopGroupMember,
    Ipv4Nexthop,
    Ipv6Nexthop,
    Ipv4Neighbor,
    Ipv6Neighbor,
}

impl fmt::Display for CrmResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrmResourceType::NexthopGroup => "nexthop_group",
            CrmResourceType::NexthopGroupMember => "nexthop_group_member",
            CrmResourceType::Ipv4Nexthop => "ipv4_nexthop",
            CrmResourceType::Ipv6Nexthop => "ipv6_nexthop",
            CrmResourceType::Ipv4Neighbor => "ipv4_neighbor",
            CrmResourceType::Ipv6Neighbor => "ipv6_neighbor",
        };
        write!(f, "{}", s)
    }
}
