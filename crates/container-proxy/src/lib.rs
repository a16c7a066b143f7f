//! Transparent container proxy for build steps.
//!
//! A [`ProxyingRunner`] stands in for the host process launcher. The first
//! command it sees resolves an image, starts one detached container that
//! mirrors the caller's workspace and identity, and from then on every
//! command is rewritten into an `exec` inside that container. [`teardown`]
//! switches proxying off and removes the container.

pub mod command;
pub mod context;
pub mod error;
pub mod launcher;
pub mod proxy;
pub mod resolve;
pub mod runtime;
pub mod selector;
pub mod startup;
pub mod teardown;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{ArgumentList, Command, LaunchOutcome, OutputMode, StdinSource};
pub use context::{ContainerId, ExecutionContext, ImageReference, Lifecycle, ProxyState};
pub use error::ProxyError;
pub use launcher::{CommandRunner, DirectRunner};
pub use proxy::ProxyingRunner;
pub use resolve::resolve_image;
pub use runtime::{DetachedRun, RuntimeClient, RuntimeSettings};
pub use selector::{dockerfile_tag, BuildContext, DockerfileImage, ImageSelector, NamedImage};
pub use startup::{ensure_container, host_temp_dir};
pub use teardown::{teardown, TeardownOutcome};

/// Label key stamped on every container this crate starts.
pub const CONTEXT_LABEL: &str = "buildbox.context";
