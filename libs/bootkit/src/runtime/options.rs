use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::class::Class;
use crate::descriptor::ModuleDescriptor;
use crate::runtime::exit::{ProcessExit, StdProcessExit};

/// Role information attached to a runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeMeta {
    /// Set when the runtime runs inside a supervised worker process.
    pub is_worker: bool,
    /// The supervisor-assigned worker id, if any.
    pub worker_id: Option<u32>,
}

/// What triggers the graceful-shutdown hook installed by `Runtime::init`.
#[derive(Clone, Default)]
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    #[default]
    Signals,
    /// An external `CancellationToken` plays the role of the signal.
    Token(CancellationToken),
    /// No hook; the owner calls `Runtime::shutdown` itself.
    Disabled,
}

/// Everything needed to build a [`Runtime`](crate::Runtime).
///
/// Cloneable so a supervisor can hand the same wiring to every worker.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub modules: Vec<ModuleDescriptor>,
    pub providers: Vec<Class>,
    pub meta: RuntimeMeta,
    pub shutdown: ShutdownOptions,
    pub exit: Arc<dyn ProcessExit>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            providers: Vec::new(),
            meta: RuntimeMeta::default(),
            shutdown: ShutdownOptions::default(),
            exit: Arc::new(StdProcessExit),
        }
    }
}

impl RuntimeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module (bare class or mounted descriptor).
    #[must_use]
    pub fn module(mut self, module: impl Into<ModuleDescriptor>) -> Self {
        self.modules.push(module.into());
        self
    }

    /// Append a provider class; providers are registered before modules.
    #[must_use]
    pub fn provider(mut self, provider: Class) -> Self {
        self.providers.push(provider);
        self
    }

    /// Mark the runtime as running inside worker `id`.
    #[must_use]
    pub fn worker(mut self, id: u32) -> Self {
        self.meta = RuntimeMeta {
            is_worker: true,
            worker_id: Some(id),
        };
        self
    }

    #[must_use]
    pub fn without_signal_hook(mut self) -> Self {
        self.shutdown = ShutdownOptions::Disabled;
        self
    }

    /// Drive the graceful-shutdown hook from `token` instead of OS signals.
    #[must_use]
    pub fn shutdown_on(mut self, token: CancellationToken) -> Self {
        self.shutdown = ShutdownOptions::Token(token);
        self
    }

    #[must_use]
    pub fn exit_with(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = exit;
        self
    }
}

impl std::fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hook = match self.shutdown {
            ShutdownOptions::Signals => "signals",
            ShutdownOptions::Token(_) => "token",
            ShutdownOptions::Disabled => "disabled",
        };
        f.debug_struct("RuntimeOptions")
            .field("modules", &self.modules)
            .field("providers", &self.providers)
            .field("meta", &self.meta)
            .field("shutdown", &hook)
            .finish_non_exhaustive()
    }
}
