//! Port oper-state table.
//!
//! The daemon feeds oper-state transitions from here into the fine-grained
//! controller, which uses them to gate link-pinned members.

use fgecmp_types::PortOperStatus;
use log::info;
use std::collections::HashMap;

/// Tracks the operational state of front-panel ports.
#[derive(Debug, Default)]
pub struct PortsOrch {
    ports: HashMap<String, PortOperStatus>,
}

impl PortsOrch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&mut self, alias: impl Into<String>, status: PortOperStatus) {
        self.ports.insert(alias.into(), status);
    }

    /// Returns the oper state of a known port.
    pub fn oper_status(&self, alias: &str) -> Option<PortOperStatus> {
        self.ports.get(alias).copied()
    }

    /// Records a state transition; returns true when the state changed.
    pub fn set_oper_status(&mut self, alias: &str, status: PortOperStatus) -> bool {
        match self.ports.get_mut(alias) {
            Some(current) if *current != status => {
                info!("PortsOrch: {} oper state {} -> {}", alias, current, status);
                *current = status;
                true
            }
            Some(_) => false,
            None => {
                self.ports.insert(alias.to_string(), status);
                true
            }
        }
    }
}
