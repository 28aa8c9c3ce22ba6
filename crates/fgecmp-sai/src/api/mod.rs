//! Abstract southbound APIs.
//!
//! Each submodule wraps one family of ASIC calls. Only the fine-grained
//! group family is needed by this controller.

mod group;

pub use group::{FineGrainedGroupApi, RouteNextHopId};
