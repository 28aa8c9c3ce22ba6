//! Neighbour resolver collaborator.

mod orch;
mod types;

pub use orch::{NeighOrch, NeighOrchError};
pub use types::NeighborEntry;
