//! Runtime - owns the provider registry and drives the module lifecycle.
//!
//! Phase order inside `init()`:
//! - shutdown hook (signals or external token, unless disabled)
//! - instantiation (construct every module lacking an instance, register it)
//! - init (registration order, strictly sequential)
//! - ready
//!
//! `shutdown()` walks the initialized modules in reverse registration order. Startup
//! faults are fatal (the exit handler runs with status 1); teardown faults are logged
//! and contained to the module that raised them.
//!
//! The shutdown hook never exits mid-startup or mid-teardown: a trigger during `init()`
//! waits for startup to settle, and exit 0 is only reported after teardown completed.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::context::InitCtx;
use crate::contracts::Module;
use crate::descriptor::{ModuleDescriptor, ModuleInstance};
use crate::error::{RegistrationError, ResolutionError, RuntimeError, error_chain};
use crate::events::Listeners;
use crate::provider::Injectable;
use crate::registry::ProviderRegistry;
use crate::runtime::exit::ProcessExit;
use crate::runtime::options::{RuntimeMeta, RuntimeOptions, ShutdownOptions};
use crate::runtime::shutdown;
use crate::storage::Storage;
use crate::token::{Token, short_type_name};

/// Runtime-level lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Shutdown,
    /// A module failed to construct or initialize; the runtime will not start again.
    Failed,
}

/// Per-module lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Registered,
    Instantiated,
    Initialized,
    ShuttingDown,
    Shutdown,
}

/// Snapshot of one registered module.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub class: &'static str,
    pub state: ModuleState,
    pub init_elapsed: Option<Duration>,
}

/// Lifecycle notifications.
pub enum RuntimeEvent<'a> {
    Ready(&'a Runtime),
    ModuleInit {
        module: &'a dyn Module,
        elapsed: Duration,
    },
    Shutdown,
}

pub type RuntimeListener = dyn Fn(&RuntimeEvent<'_>) + Send + Sync;

struct ModuleSlot {
    descriptor: ModuleDescriptor,
    state: ModuleState,
    init_elapsed: Option<Duration>,
}

struct RuntimeInner {
    registry: ProviderRegistry,
    modules: Mutex<Vec<ModuleSlot>>,
    state: Mutex<RuntimeState>,
    storage: Storage,
    meta: RuntimeMeta,
    shutdown: ShutdownOptions,
    exit: Arc<dyn ProcessExit>,
    listeners: Listeners<RuntimeListener>,
    hook_installed: AtomicBool,
    /// Cancelled when shutdown starts; parent of every module's token.
    cancel: CancellationToken,
    /// Cancelled once `init()` has reached `Ready` or `Failed`.
    settled: CancellationToken,
    /// Cancelled once shutdown has completed.
    closed: CancellationToken,
}

/// The module runtime. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning reference to a [`Runtime`], handed to modules after construction.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
}

impl RuntimeHandle {
    /// The runtime, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

fn fmt_elapsed(d: Duration) -> humantime::FormattedDuration {
    let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(ms))
}

impl Runtime {
    /// Build a runtime: register its own handle, the providers, then the modules.
    ///
    /// Modules that fail validation are logged and skipped.
    ///
    /// # Errors
    /// `RuntimeError::Provider` if a provider constructor fails.
    pub fn new(options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let RuntimeOptions {
            modules,
            providers,
            meta,
            shutdown,
            exit,
        } = options;

        let runtime = Runtime {
            inner: Arc::new(RuntimeInner {
                registry: ProviderRegistry::new(),
                modules: Mutex::new(Vec::new()),
                state: Mutex::new(RuntimeState::Uninitialized),
                storage: Storage::new(),
                meta,
                shutdown,
                exit,
                listeners: Listeners::new(),
                hook_installed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                settled: CancellationToken::new(),
                closed: CancellationToken::new(),
            }),
        };

        runtime
            .inner
            .registry
            .register_instance(Token::of::<RuntimeHandle>(), Arc::new(runtime.handle()));

        for provider in &providers {
            runtime
                .inner
                .registry
                .register_class(provider)
                .map_err(|source| RuntimeError::Provider {
                    provider: provider.name(),
                    source,
                })?;
        }

        for module in modules {
            // Already logged; a bad entry never prevents the rest from registering.
            if let Err(err) = runtime.register_module(module) {
                tracing::debug!(error = %err, "module entry skipped");
            }
        }

        Ok(runtime)
    }

    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Append a module to the initialization order.
    ///
    /// # Errors
    /// `RegistrationError::NotAModule` if the class lacks the module capability,
    /// `RegistrationError::AfterInit` once `init()` has started. Both are logged and
    /// leave the module list unchanged.
    pub fn register_module(
        &self,
        module: impl Into<ModuleDescriptor>,
    ) -> Result<(), RegistrationError> {
        let descriptor = module.into();
        let class = descriptor.class();

        if !class.is_module() {
            tracing::error!(class = class.name(), "not a module; registration skipped");
            return Err(RegistrationError::NotAModule {
                class: class.name(),
            });
        }

        let state = self.inner.state.lock();
        if *state != RuntimeState::Uninitialized {
            tracing::error!(
                module = class.name(),
                state = ?*state,
                "module registered after init; registration skipped"
            );
            return Err(RegistrationError::AfterInit {
                module: class.name(),
            });
        }

        let initial = if descriptor.is_instantiated() {
            ModuleState::Instantiated
        } else {
            ModuleState::Registered
        };
        tracing::debug!(module = class.name(), "module registered");
        self.inner.modules.lock().push(ModuleSlot {
            descriptor,
            state: initial,
            init_elapsed: None,
        });
        drop(state);
        Ok(())
    }

    /// Instantiate and initialize all registered modules. A no-op once started.
    ///
    /// On a construction or `init` failure the error is logged, the exit handler is
    /// invoked with status 1 and, should it return, the error is returned.
    ///
    /// # Errors
    /// `RuntimeError::Instantiate` / `RuntimeError::Init` for the failing module,
    /// `RuntimeError::AlreadyFailed` when called again after such a failure.
    pub async fn init(&self) -> Result<(), RuntimeError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                RuntimeState::Uninitialized => *state = RuntimeState::Initializing,
                RuntimeState::Failed => return Err(RuntimeError::AlreadyFailed),
                current => {
                    tracing::debug!(state = ?current, "init already performed; ignoring");
                    return Ok(());
                }
            }
        }

        let started = Instant::now();
        self.install_shutdown_hook();

        if let Err(err) = self.run_instantiation_phase() {
            return Err(self.fail(err));
        }
        if let Err(err) = self.run_init_phase().await {
            return Err(self.fail(err));
        }

        *self.inner.state.lock() = RuntimeState::Ready;
        self.inner.settled.cancel();

        tracing::info!(
            modules = self.module_count(),
            elapsed = %fmt_elapsed(started.elapsed()),
            "Successfully initialized modules"
        );
        self.emit(&RuntimeEvent::Ready(self));
        Ok(())
    }

    fn fail(&self, err: RuntimeError) -> RuntimeError {
        *self.inner.state.lock() = RuntimeState::Failed;
        self.inner.settled.cancel();
        tracing::error!(error = %error_chain(&err), "fatal startup fault");
        self.inner.exit.exit(1);
        err
    }

    /// INSTANTIATION phase: construct every module lacking an instance, attach the
    /// runtime handle and register the instance under its class (and token).
    fn run_instantiation_phase(&self) -> Result<(), RuntimeError> {
        tracing::debug!("Phase: instantiate");
        let count = self.module_count();

        for idx in 0..count {
            let (class, token, existing) = {
                let modules = self.inner.modules.lock();
                let d = &modules[idx].descriptor;
                (d.class().clone(), d.token().cloned(), d.instance().cloned())
            };

            let instance = if let Some(instance) = existing {
                instance
            } else {
                let entry = class.construct(&self.inner.registry).map_err(|source| {
                    RuntimeError::Instantiate {
                        module: class.name(),
                        source,
                    }
                })?;
                let module = class
                    .module_of(&entry)
                    .ok_or_else(|| RuntimeError::Instantiate {
                        module: class.name(),
                        source: anyhow::anyhow!("constructed instance is not a module"),
                    })?;
                ModuleInstance { entry, module }
            };

            instance.module.attach_runtime(&self.handle());
            self.inner
                .registry
                .register_entry(class.token().clone(), instance.entry.clone());
            if let Some(token) = token {
                self.inner
                    .registry
                    .register_entry(token, instance.entry.clone());
            }

            let mut modules = self.inner.modules.lock();
            let slot = &mut modules[idx];
            slot.descriptor.set_instance(instance);
            slot.state = ModuleState::Instantiated;
            tracing::debug!(module = class.name(), "module instantiated");
        }

        Ok(())
    }

    /// INIT phase: run every module's `init` in registration order.
    async fn run_init_phase(&self) -> Result<(), RuntimeError> {
        tracing::debug!("Phase: init");
        let count = self.module_count();

        for idx in 0..count {
            let (class, module, options) = {
                let modules = self.inner.modules.lock();
                let d = &modules[idx].descriptor;
                (
                    d.class().name(),
                    d.instance().map(|i| Arc::clone(&i.module)),
                    Arc::new(d.options().clone()),
                )
            };
            let Some(module) = module else {
                return Err(RuntimeError::Init {
                    module: class.to_owned(),
                    source: anyhow::anyhow!("module instance is not defined"),
                });
            };

            let name = module.name().to_owned();
            let ctx = InitCtx::new(
                self.clone(),
                name.as_str(),
                options,
                self.inner.cancel.child_token(),
            );

            let started = Instant::now();
            module
                .init(&ctx)
                .await
                .map_err(|source| RuntimeError::Init {
                    module: name.clone(),
                    source,
                })?;
            let elapsed = started.elapsed();

            {
                let mut modules = self.inner.modules.lock();
                let slot = &mut modules[idx];
                slot.state = ModuleState::Initialized;
                slot.init_elapsed = Some(elapsed);
            }

            tracing::info!(
                module = %name,
                elapsed = %fmt_elapsed(elapsed),
                "Successfully initialized module"
            );
            self.emit(&RuntimeEvent::ModuleInit {
                module: module.as_ref(),
                elapsed,
            });
        }

        Ok(())
    }

    /// Tear down initialized modules in reverse registration order.
    ///
    /// Only meaningful once `Ready`. A call made while another one is tearing down waits
    /// for that teardown to finish; calls in any other state are no-ops.
    /// A failing module `shutdown` is logged and the pass continues.
    pub async fn shutdown(&self) {
        let in_progress = {
            let mut state = self.inner.state.lock();
            match *state {
                RuntimeState::Ready => {
                    *state = RuntimeState::ShuttingDown;
                    false
                }
                RuntimeState::ShuttingDown => true,
                current => {
                    tracing::debug!(state = ?current, "shutdown ignored");
                    return;
                }
            }
        };
        if in_progress {
            tracing::debug!("shutdown already in progress; waiting for it to finish");
            self.inner.closed.cancelled().await;
            return;
        }

        tracing::info!("Shutting down modules");
        self.inner.cancel.cancel();

        let initialized: Vec<(usize, Arc<dyn Module>)> = {
            let mut modules = self.inner.modules.lock();
            modules
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| slot.state == ModuleState::Initialized)
                .filter_map(|(idx, slot)| {
                    let module = slot.descriptor.instance().map(|i| Arc::clone(&i.module))?;
                    slot.state = ModuleState::ShuttingDown;
                    Some((idx, module))
                })
                .collect()
        };

        for (idx, module) in initialized.into_iter().rev() {
            match module.shutdown().await {
                Ok(()) => tracing::debug!(module = module.name(), "module shut down"),
                Err(e) => tracing::error!(
                    module = module.name(),
                    error = %format!("{e:#}"),
                    "module shutdown failed; continuing"
                ),
            }
            self.inner.modules.lock()[idx].state = ModuleState::Shutdown;
        }

        *self.inner.state.lock() = RuntimeState::Shutdown;
        tracing::info!("Runtime shut down");
        self.emit(&RuntimeEvent::Shutdown);
        self.inner.closed.cancel();
    }

    /// Resolves once `shutdown()` has completed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    fn install_shutdown_hook(&self) {
        if self.inner.hook_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        let external = match &self.inner.shutdown {
            ShutdownOptions::Disabled => {
                tracing::debug!("graceful-shutdown hook disabled");
                return;
            }
            ShutdownOptions::Signals => None,
            ShutdownOptions::Token(token) => Some(token.clone()),
        };

        let runtime = self.clone();
        tokio::spawn(async move {
            let closed = runtime.inner.closed.clone();
            let signal = tokio::select! {
                signal = shutdown::wait_trigger(external) => signal,
                () = closed.cancelled() => return,
            };
            tracing::info!(signal = ?signal, "graceful shutdown requested");

            if !runtime.wait_startup_settled().await {
                // The fatal startup path owns the exit.
                return;
            }
            runtime.shutdown().await;
            runtime.inner.exit.exit(0);
        });
    }

    /// Waits for an in-flight `init()` to reach `Ready` or `Failed`.
    /// Returns `false` if startup failed.
    async fn wait_startup_settled(&self) -> bool {
        if self.state() == RuntimeState::Initializing {
            tracing::info!("shutdown requested during startup; waiting for init to finish");
        }
        self.inner.settled.cancelled().await;
        self.state() != RuntimeState::Failed
    }

    fn emit(&self, event: &RuntimeEvent<'_>) {
        for listener in self.inner.listeners.snapshot() {
            listener(event);
        }
    }

    /// Register a lifecycle listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&RuntimeEvent<'_>) + Send + Sync + 'static,
    {
        self.inner.listeners.push(Arc::new(listener));
    }

    // ---- registry pass-throughs ----

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn resolve<T>(&self, token: &Token) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.registry.resolve(token)
    }

    #[must_use]
    pub fn resolve_type<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.registry.resolve_type()
    }

    /// # Errors
    /// See [`ProviderRegistry::resolve_or_fail`].
    pub fn resolve_or_fail<T>(&self, token: &Token) -> Result<Arc<T>, ResolutionError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.registry.resolve_or_fail(token)
    }

    /// # Errors
    /// Propagates the constructor's error.
    pub fn instantiate<T: Injectable>(&self) -> anyhow::Result<T> {
        self.inner.registry.instantiate()
    }

    /// The instance of module `M`, looked up by `token` if given, else by its type.
    #[must_use]
    pub fn get_module<M: Module>(&self, token: Option<&Token>) -> Option<Arc<M>> {
        match token {
            Some(token) => self.resolve::<M>(token),
            None => self.resolve_type::<M>(),
        }
    }

    /// # Errors
    /// `RuntimeError::ModuleNotFound` naming `M` when there is no such instance.
    pub fn get_module_or_fail<M: Module>(
        &self,
        token: Option<&Token>,
    ) -> Result<Arc<M>, RuntimeError> {
        self.get_module::<M>(token)
            .ok_or_else(|| RuntimeError::ModuleNotFound {
                module: short_type_name(std::any::type_name::<M>()),
            })
    }

    // ---- introspection ----

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.inner.state.lock()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state(),
            RuntimeState::Ready | RuntimeState::ShuttingDown | RuntimeState::Shutdown
        )
    }

    #[must_use]
    pub fn meta(&self) -> RuntimeMeta {
        self.inner.meta
    }

    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.inner.meta.is_worker
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// Cancelled when shutdown starts.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        self.inner.modules.lock().len()
    }

    /// Registered modules in registration order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.inner
            .modules
            .lock()
            .iter()
            .map(|slot| ModuleInfo {
                name: slot.descriptor.instance().map_or_else(
                    || slot.descriptor.class().name().to_owned(),
                    |i| i.module.name().to_owned(),
                ),
                class: slot.descriptor.class().name(),
                state: slot.state,
                init_elapsed: slot.init_elapsed,
            })
            .collect()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("meta", &self.inner.meta)
            .field("modules", &self.module_count())
            .field("providers", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}
