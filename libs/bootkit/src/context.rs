use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

/// Options error for typed option access.
#[derive(thiserror::Error, Debug)]
pub enum OptionsError {
    #[error("module '{module}' was mounted without options")]
    Missing { module: String },
    #[error("invalid options for module '{module}': {source}")]
    Invalid {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What a module sees while its `init` hook runs.
///
/// ```ignore
/// async fn init(&self, ctx: &InitCtx) -> anyhow::Result<()> {
///     let cfg: GreeterOptions = ctx.options()?;
///     let clock = ctx.runtime().resolve_or_fail::<dyn Clock>(&Token::of::<dyn Clock>())?;
///     ctx.runtime().storage().insert("greeting", cfg.greeting);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InitCtx {
    runtime: Runtime,
    module_name: Arc<str>,
    options: Arc<serde_json::Value>,
    cancellation_token: CancellationToken,
}

impl InitCtx {
    pub(crate) fn new(
        runtime: Runtime,
        module_name: impl Into<Arc<str>>,
        options: Arc<serde_json::Value>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            module_name: module_name.into(),
            options,
            cancellation_token,
        }
    }

    #[inline]
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[inline]
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Whether this runtime runs inside a supervised worker process.
    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.runtime.is_worker()
    }

    /// Cancelled as soon as the runtime starts shutting down.
    ///
    /// Background tasks spawned from `init` should select on it.
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// The options exactly as mounted.
    #[must_use]
    pub fn raw_options(&self) -> &serde_json::Value {
        &self.options
    }

    /// Deserialize the mount options into `T`, or use `T::default()` when none were given.
    ///
    /// # Errors
    /// `OptionsError::Invalid` if options are present but do not match `T`.
    pub fn options<T: DeserializeOwned + Default>(&self) -> Result<T, OptionsError> {
        if self.options.is_null() {
            return Ok(T::default());
        }
        self.parse()
    }

    /// Deserialize the mount options into `T`; missing options are an error.
    ///
    /// # Errors
    /// `OptionsError::Missing` if the module was mounted without options,
    /// `OptionsError::Invalid` if they do not match `T`.
    pub fn options_required<T: DeserializeOwned>(&self) -> Result<T, OptionsError> {
        if self.options.is_null() {
            return Err(OptionsError::Missing {
                module: self.module_name.to_string(),
            });
        }
        self.parse()
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T, OptionsError> {
        T::deserialize(&*self.options).map_err(|source| OptionsError::Invalid {
            module: self.module_name.to_string(),
            source,
        })
    }
}
