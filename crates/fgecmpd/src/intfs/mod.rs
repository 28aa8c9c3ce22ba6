//! Router-interface lookup collaborator.

mod orch;

pub use orch::{IntfsEntry, IntfsOrch};
