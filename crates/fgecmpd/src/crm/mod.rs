//! Resource-usage accounting for ASIC objects.

mod orch;
mod types;

pub use orch::CrmOrch;
pub use types::CrmResourceType;
