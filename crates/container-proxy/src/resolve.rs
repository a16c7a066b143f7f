use tracing::{info, instrument};

use crate::context::{ExecutionContext, ImageReference};
use crate::error::ProxyError;
use crate::runtime::RuntimeClient;
use crate::selector::{BuildContext, ImageSelector};

/// Returns the context's image, asking `selector` for it on first use only.
///
/// Selector failures come back as-is. The failure is recorded on the context
/// before the lock is released, so callers queued behind it get
/// `ContextFailed` instead of a second selector run.
#[instrument(skip_all, fields(context = %ctx.id(), build = %build.name))]
pub fn resolve_image(
    ctx: &ExecutionContext,
    selector: &dyn ImageSelector,
    runtime: &RuntimeClient,
    build: &BuildContext,
) -> Result<ImageReference, ProxyError> {
    if let Some(image) = ctx.image() {
        return Ok(image.clone());
    }
    let _guard = ctx.lock_image();
    if let Some(image) = ctx.image() {
        return Ok(image.clone());
    }
    if let Some(stage) = ctx.failure() {
        return Err(ProxyError::ContextFailed { stage });
    }

    info!("preparing image to host the build environment");
    let image = selector.prepare_image(runtime, build).map_err(|err| {
        ctx.record_failure(err.stage());
        err
    })?;
    info!(image = %image, "image ready");
    Ok(ctx.set_image(image).clone())
}
