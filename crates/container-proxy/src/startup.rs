use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use tracing::{debug, instrument};

use crate::context::{ContainerId, ExecutionContext, ImageReference};
use crate::error::ProxyError;
use crate::runtime::{DetachedRun, RuntimeClient};

static HOST_TMPDIR: Lazy<PathBuf> = Lazy::new(std::env::temp_dir);

/// Host temp directory, looked up once per process.
pub fn host_temp_dir() -> &'static Path {
    HOST_TMPDIR.as_path()
}

/// Returns the context's container, starting it on first use only.
///
/// Requires a resolved image. Refuses to start anything once the context
/// has been torn down or an earlier start failed. A failure is recorded
/// before the lock is released.
#[instrument(skip_all, fields(context = %ctx.id(), workspace = %workspace_dir.display()))]
pub fn ensure_container(
    ctx: &ExecutionContext,
    runtime: &RuntimeClient,
    workspace_dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<ContainerId, ProxyError> {
    if let Some(id) = ctx.container() {
        return Ok(id.clone());
    }
    let _guard = ctx.lock_container();
    if let Some(id) = ctx.container() {
        return Ok(id.clone());
    }
    if let Some(stage) = ctx.failure() {
        return Err(ProxyError::ContextFailed { stage });
    }
    if !ctx.is_proxying_enabled() {
        return Err(ProxyError::TornDown);
    }
    let image = ctx.image().cloned().ok_or(ProxyError::ImageUnresolved)?;

    start_container(ctx, runtime, &image, workspace_dir, env).map_err(|err| {
        ctx.record_failure(err.stage());
        err
    })
}

fn start_container(
    ctx: &ExecutionContext,
    runtime: &RuntimeClient,
    image: &ImageReference,
    workspace_dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<ContainerId, ProxyError> {
    let uid = runtime.resolve_numeric_identity("-u")?;
    let gid = runtime.resolve_numeric_identity("-g")?;
    let temp_dir = runtime
        .settings()
        .tmp_dir
        .clone()
        .unwrap_or_else(|| host_temp_dir().to_path_buf());
    debug!(uid = %uid, gid = %gid, tmp = %temp_dir.display(), "starting build container");

    ctx.mark_startup_attempted();
    let id = runtime.run_detached(&DetachedRun {
        image,
        workspace_dir,
        temp_dir: &temp_dir,
        env,
        uid: &uid,
        gid: &gid,
        labels: vec![ctx.label()],
    })?;

    ctx.set_container(id)
        .cloned()
        .ok_or(ProxyError::ImageUnresolved)
}
