//! Typed ASIC object ids and the abstract southbound used by fgecmpd.
//!
//! The forwarding ASIC is reached through [`FineGrainedGroupApi`], a small
//! trait modelled on the switch-abstraction-interface group/member/route
//! calls. Production wires it to the real SAI binding; tests use a
//! recording fake. Object ids are phantom-typed so a router-interface id
//! cannot be passed where a group-member id is expected.

mod error;
mod types;

pub mod api;
pub mod sim;

pub use api::FineGrainedGroupApi;
pub use error::{SaiError, SaiResult, SaiStatus};
pub use types::{
    NextHopGroupMemberOid, NextHopGroupOid, NextHopOid, RawSaiObjectId, RouterInterfaceOid,
    SaiObjectId, SaiObjectKind, VirtualRouterOid,
};
