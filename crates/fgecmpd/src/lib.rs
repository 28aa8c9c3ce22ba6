//! fgecmpd - fine-grained ECMP route controller.
//!
//! Programs a forwarding ASIC so that routes attached to fine-grained
//! next-hop groups survive next-hop churn without moving flows hashed
//! onto unrelated next-hops. The controller owns the bucket -> next-hop
//! mapping of every fine-grained group and rebalances it under member
//! up/down events with the minimum number of bucket rewrites.
//!
//! # Architecture
//!
//! ```text
//! [config tables] --> [OrchDaemon] --> FgNhgOrch --> [ASIC southbound]
//!                                          |
//!                                          +-------> [state DB checkpoint]
//! ```
//!
//! - [`fg_nhg`]: the controller core (planner, rebalancer, store,
//!   controller, warm-restart recoverer)
//! - [`neigh`], [`intfs`], [`ports`], [`crm`]: collaborator state the
//!   controller consults through its callbacks
//! - [`daemon`]: the single-task event pump

pub mod crm;
pub mod daemon;
pub mod fg_nhg;
pub mod intfs;
pub mod neigh;
pub mod ports;
pub mod route;

pub use fgecmp_orch_common::{
    Consumer, ConsumerConfig, KeyOpFieldsValues, Operation, Orch, OrchContext, SyncMap,
    TaskError, TaskResult, TaskStatus, WarmRestartTable,
};
pub use fgecmp_sai::{SaiError, SaiResult};
pub use fgecmp_types::{IpAddress, IpPrefix, MacAddress, PortOperStatus};

pub use crm::{CrmOrch, CrmResourceType};
pub use daemon::{OrchDaemon, OrchDaemonConfig};
pub use fg_nhg::{FgNhgError, FgNhgOrch, FgNhgOrchCallbacks, FgNhgOrchConfig};
pub use intfs::IntfsOrch;
pub use neigh::NeighOrch;
pub use ports::PortsOrch;
pub use route::{NextHopFlags, NextHopGroupKey, NextHopKey};
