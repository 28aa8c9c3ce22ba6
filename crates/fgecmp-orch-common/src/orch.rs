//! Base Orch trait and shared context.

use async_trait::async_trait;

/// Context shared across Orch modules.
#[derive(Debug, Clone, Default)]
pub struct OrchContext {
    /// True while warm-restart replay is still in progress.
    pub warm_restart_in_progress: bool,
}

/// Base trait for orchestration modules.
///
/// Each module implements this trait to participate in the daemon's event
/// loop. The daemon calls `do_task()` whenever the module reports pending
/// work; processing order between modules follows `priority()`.
///
/// # Lifecycle
///
/// 1. Construction with collaborator handles
/// 2. Registration with the daemon
/// 3. `bake()` once at startup when warm-restarting, before any live event
/// 4. `do_task()` for the lifetime of the daemon
#[async_trait]
pub trait Orch: Send + Sync {
    /// Name of this Orch, for logging.
    fn name(&self) -> &str;

    /// Drains and processes pending entries from this Orch's consumers.
    ///
    /// Entries that hit a transient failure are re-queued by the
    /// implementation and retried on a later call.
    async fn do_task(&mut self);

    /// Warm-restart recovery hook, called once before the first live event.
    ///
    /// Returns `true` if recovery state was loaded successfully.
    fn bake(&mut self) -> bool {
        true
    }

    /// Called when warm-restart replay has finished.
    fn on_warm_restart_end(&mut self) {}

    /// Processing priority; lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has queued work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Human-readable dump of queued work, for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}
