//! Fine-grained next-hop group orchestration.
//!
//! A fine-grained group owns a fixed-size array of hash buckets, populated
//! once at group creation and never resized. Operators partition the
//! group's next-hops into banks; each bank owns a contiguous bucket range.
//! Under member churn the controller rewrites only the buckets it must:
//! a swapped member inherits its predecessor's buckets verbatim, a removed
//! member's buckets are spread round-robin over the bank's survivors, and a
//! new member steals buckets until the bank is balanced again. Flows hashed
//! onto unrelated buckets never move.
//!
//! A bank whose members are all down delegates its bucket range to an
//! active bank; when every bank is down the route degrades to a plain
//! router-interface route until a member recovers. Every bucket write is
//! checkpointed so a warm restart reproduces the exact pre-restart layout.

mod orch;
mod planner;
mod rebalance;
mod recovery;
mod store;
mod types;

pub use orch::{
    FgNhgError, FgNhgOrch, FgNhgOrchCallbacks, FgNhgOrchConfig, FG_NHG_MEMBER_TABLE,
    FG_NHG_PREFIX_TABLE, FG_NHG_TABLE,
};
pub use planner::calculate_bank_hash_bucket_ranges;
pub use recovery::RecoveryMap;
pub use store::FgNhgStore;
pub use types::{
    Bank, BankMemberChanges, BankNextHopMap, BankRange, BucketIndex, FgGroupInstance,
    FgMatchMode, FgNextHopInfo, FgNhgEntry,
};
