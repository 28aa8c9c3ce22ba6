//! Resource counter registry.

use super::types::CrmResourceType;
use log::warn;
use std::collections::HashMap;

/// Tracks used-object counts per resource type.
///
/// Counters move in lockstep with object create/destroy calls; a decrement
/// below zero indicates unbalanced accounting and is logged rather than
/// wrapped.
#[derive(Debug, Default)]
pub struct CrmOrch {
    used: HashMap<CrmResourceType, u32>,
}

impl CrmOrch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the used counter for a resource.
    pub fn inc_used(&mut self, resource: CrmResourceType) {
        *self.used.entry(resource).or_insert(0) += 1;
    }

    /// Decrements the used counter for a resource.
    pub fn dec_used(&mut self, resource: CrmResourceType) {
        match self.used.get_mut(&resource) {
            Some(count) if *count > 0 => *count -= 1,
            _ => warn!("CrmOrch: decrement of {} below zero", resource),
        }
    }

    /// Returns the used count for a resource.
    pub fn used(&self, resource: CrmResourceType) -> u32 {
        self.used.get(&resource).copied().unwrap_or(0)
    }
}
