//! Port operational state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational state of a front-panel port.
///
/// Link-pinned next-hop group members track this state; a member whose port
/// is down is excluded from bucket assignment even when its neighbour is
/// resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PortOperStatus {
    #[default]
    Down,
    Up,
}

impl PortOperStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, PortOperStatus::Up)
    }
}

impl fmt::Display for PortOperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortOperStatus::Up => write!(f, "up"),
            PortOperStatus::Down => write!(f, "down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oper_status() {
        assert!(PortOperStatus::Up.is_up());
        assert!(!PortOperStatus::Down.is_up());
        assert_eq!(PortOperStatus::default(), PortOperStatus::Down);
    }
}
