use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::OnceCell;
use uuid::Uuid;

/// Image tag or digest handed out by an image selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageReference {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier the engine printed when the container started.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How far lazy initialization has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unresolved,
    ImageReady,
    ContainerReady,
}

/// What the proxy does with the next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyState {
    /// No container yet; the next command triggers initialization.
    Passthrough,
    /// Commands are rewritten to exec inside this container.
    Proxied(ContainerId),
    /// Teardown has begun; commands run on the host from now on.
    Disabled,
}

/// Per-build-step lifecycle state shared by every proxied command.
///
/// `image` and `container` are single-assignment. `proxying_enabled` only
/// ever goes from true to false.
#[derive(Debug)]
pub struct ExecutionContext {
    id: Uuid,
    image: OnceCell<ImageReference>,
    container: OnceCell<ContainerId>,
    proxying_enabled: AtomicBool,
    startup_attempted: AtomicBool,
    torn_down: AtomicBool,
    failure: OnceCell<&'static str>,
    image_lock: Mutex<()>,
    container_lock: Mutex<()>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            image: OnceCell::new(),
            container: OnceCell::new(),
            proxying_enabled: AtomicBool::new(true),
            startup_attempted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            failure: OnceCell::new(),
            image_lock: Mutex::new(()),
            container_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> Option<&ImageReference> {
        self.image.get()
    }

    pub fn container(&self) -> Option<&ContainerId> {
        self.container.get()
    }

    pub fn is_proxying_enabled(&self) -> bool {
        self.proxying_enabled.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match (self.image.get(), self.container.get()) {
            (_, Some(_)) => Lifecycle::ContainerReady,
            (Some(_), None) => Lifecycle::ImageReady,
            (None, None) => Lifecycle::Unresolved,
        }
    }

    pub fn state(&self) -> ProxyState {
        if !self.is_proxying_enabled() {
            return ProxyState::Disabled;
        }
        match self.container.get() {
            Some(id) => ProxyState::Proxied(id.clone()),
            None => ProxyState::Passthrough,
        }
    }

    /// Stage at which initialization failed, if it did.
    pub fn failure(&self) -> Option<&'static str> {
        self.failure.get().copied()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Label value stamped on the container so orphans can be found.
    pub fn label(&self) -> String {
        format!("{}={}", crate::CONTEXT_LABEL, self.id)
    }

    pub(crate) fn set_image(&self, image: ImageReference) -> &ImageReference {
        self.image.get_or_init(|| image)
    }

    /// Records the started container. Requires a resolved image.
    pub(crate) fn set_container(&self, container: ContainerId) -> Option<&ContainerId> {
        self.image.get()?;
        Some(self.container.get_or_init(|| container))
    }

    pub(crate) fn mark_startup_attempted(&self) {
        self.startup_attempted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn startup_attempted(&self) -> bool {
        self.startup_attempted.load(Ordering::SeqCst)
    }

    pub(crate) fn record_failure(&self, stage: &'static str) {
        let _ = self.failure.set(stage);
    }

    /// Flips proxying off. Returns whether it was on.
    pub(crate) fn disable(&self) -> bool {
        self.proxying_enabled.swap(false, Ordering::SeqCst)
    }

    /// Claims the single teardown. Returns false if it already happened.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn lock_image(&self) -> MutexGuard<'_, ()> {
        self.image_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn lock_container(&self) -> MutexGuard<'_, ()> {
        self.container_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
