use tracing::{debug, info, instrument, warn};

use crate::context::{ContainerId, ExecutionContext};
use crate::error::ProxyError;
use crate::runtime::RuntimeClient;

/// What teardown ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// A previous call already tore the context down.
    AlreadyTornDown,
    /// No container was ever started.
    NoContainer,
    Removed {
        container: ContainerId,
        stopped: bool,
        removed: bool,
    },
    /// Startup was attempted without recording an identifier; these
    /// labelled leftovers were force-removed.
    SweptOrphans(Vec<ContainerId>),
}

/// Disables proxying, then stops and removes the context's container.
///
/// Never fails: engine errors are logged and teardown carries on.
#[instrument(skip_all, fields(context = %ctx.id()))]
pub fn teardown(ctx: &ExecutionContext, runtime: &RuntimeClient) -> TeardownOutcome {
    if !ctx.begin_teardown() {
        debug!("teardown already done");
        return TeardownOutcome::AlreadyTornDown;
    }

    // Flip before touching the engine so racing commands fall back to the host.
    ctx.disable();
    let _guard = ctx.lock_container();

    match ctx.container().cloned() {
        Some(container) => {
            info!(container = %container, "removing build container");
            let stopped = best_effort("stop", &container, runtime.stop(&container));
            let removed = best_effort("rm", &container, runtime.remove(&container));
            TeardownOutcome::Removed {
                container,
                stopped,
                removed,
            }
        }
        None if ctx.startup_attempted() => sweep_orphans(ctx, runtime),
        None => TeardownOutcome::NoContainer,
    }
}

fn sweep_orphans(ctx: &ExecutionContext, runtime: &RuntimeClient) -> TeardownOutcome {
    let label = ctx.label();
    let orphans = match runtime.list_labelled(&label) {
        Ok(orphans) => orphans,
        Err(err) => {
            warn!(label = %label, error = %err, "could not list orphaned containers");
            return TeardownOutcome::SweptOrphans(Vec::new());
        }
    };
    for orphan in &orphans {
        info!(container = %orphan, "removing orphaned build container");
        best_effort("rm -f", orphan, runtime.force_remove(orphan));
    }
    TeardownOutcome::SweptOrphans(orphans)
}

fn best_effort(op: &str, container: &ContainerId, result: Result<bool, ProxyError>) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            warn!(container = %container, op, "container cleanup step failed");
            false
        }
        Err(err) => {
            warn!(container = %container, op, error = %err, "container cleanup step failed");
            false
        }
    }
}
