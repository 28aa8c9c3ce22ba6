//! Daemon event pump.

mod orchdaemon;

pub use orchdaemon::{OrchDaemon, OrchDaemonConfig};
