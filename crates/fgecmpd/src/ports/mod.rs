//! Port operational-state collaborator.

mod orch;

pub use orch::PortsOrch;
