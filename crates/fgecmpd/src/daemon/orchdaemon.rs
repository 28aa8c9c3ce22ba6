//! Central coordinator for the registered Orch modules.
//!
//! A single cooperative task drives all orchestration: each loop iteration
//! runs every Orch with pending work, in priority order. There is no
//! cross-Orch locking because nothing else mutates Orch state.

use fgecmp_orch_common::{Orch, OrchContext};
use log::{error, info};
use std::collections::BTreeMap;

/// Configuration for the daemon loop.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Pause between pump iterations in milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
        }
    }
}

/// The event pump.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered Orchs grouped by priority; lower runs first.
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
    context: OrchContext,
    running: bool,
}

impl OrchDaemon {
    pub fn new(config: OrchDaemonConfig) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
            context: OrchContext::default(),
            running: false,
        }
    }

    /// Registers an Orch under its own priority.
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        info!("Registering {} with priority {}", orch.name(), priority);
        self.orchs.entry(priority).or_default().push(orch);
    }

    pub fn context(&self) -> &OrchContext {
        &self.context
    }

    /// Runs warm-restart recovery on every Orch, before any live event.
    pub fn prepare_warm_restart(&mut self) -> bool {
        info!("Running warm-restart recovery");
        self.context.warm_restart_in_progress = true;

        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if !orch.bake() {
                    error!("Warm-restart recovery failed for {}", orch.name());
                    return false;
                }
            }
        }

        true
    }

    /// Signals the end of warm-restart replay.
    pub fn finish_warm_restart(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                orch.on_warm_restart_end();
            }
        }
        self.context.warm_restart_in_progress = false;
    }

    /// Drives every Orch with pending work once, in priority order.
    pub async fn drain_once(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    orch.do_task().await;
                }
            }
        }
    }

    /// Runs the pump until [`stop`](Self::stop) is called.
    pub async fn run(&mut self) {
        info!("Starting event pump");
        self.running = true;

        while self.running {
            self.drain_once().await;

            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.heartbeat_interval_ms,
            ))
            .await;
        }

        info!("Event pump stopped");
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Human-readable dump of pending work across Orchs.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "[{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }
        lines
    }
}
