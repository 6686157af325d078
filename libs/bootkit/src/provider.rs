//! Explicit constructor wiring.
//!
//! A type becomes constructible by the [`ProviderRegistry`](crate::ProviderRegistry) by
//! implementing [`Injectable`]: it lists its constructor parameters as [`Dependency`]
//! values (positional order matters) and builds itself from the resolved
//! [`Dependencies`].
//!
//! ```ignore
//! struct Mailer { smtp: Option<Arc<SmtpPool>>, audit: Option<Arc<dyn AuditLog>> }
//!
//! impl Injectable for Mailer {
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![
//!             Dependency::of::<SmtpPool>(),
//!             Dependency::of::<dyn AuditLog>().inject(Token::named("audit.primary")),
//!         ]
//!     }
//!
//!     fn construct(deps: Dependencies) -> anyhow::Result<Self> {
//!         Ok(Self { smtp: deps.get(0), audit: deps.get(1) })
//!     }
//! }
//! ```
//!
//! Missing dependencies are handed to `construct` as `None`; whether that is fatal is the
//! constructor's decision ([`Dependencies::require`] turns it into an error).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::token::Token;

/// A type-erased registry entry. Holds an `Arc<T>` and hands out clones of it.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Instance {
    #[must_use]
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Typed view of the instance; `None` if it was registered as another type.
    #[must_use]
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<Arc<T>>().cloned()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether both entries wrap the very same registration.
    #[must_use]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// One constructor parameter: the declared type plus an optional explicit token override.
#[derive(Clone, Debug)]
pub struct Dependency {
    declared: Token,
    inject: Option<Token>,
}

impl Dependency {
    /// Parameter declared as type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            declared: Token::of::<T>(),
            inject: None,
        }
    }

    /// Resolve this parameter through `token` instead of its declared type.
    #[must_use]
    pub fn inject(mut self, token: Token) -> Self {
        self.inject = Some(token);
        self
    }

    #[must_use]
    pub fn declared(&self) -> &Token {
        &self.declared
    }

    /// The token actually looked up: the override if present, the declared type otherwise.
    #[must_use]
    pub fn token(&self) -> &Token {
        self.inject.as_ref().unwrap_or(&self.declared)
    }
}

/// Positionally resolved constructor arguments.
pub struct Dependencies {
    target: &'static str,
    slots: Vec<(Dependency, Option<Instance>)>,
}

impl Dependencies {
    pub(crate) fn new(target: &'static str, slots: Vec<(Dependency, Option<Instance>)>) -> Self {
        Self { target, slots }
    }

    /// Name of the type being constructed.
    #[must_use]
    pub fn target(&self) -> &'static str {
        self.target
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn is_present(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|(_, instance)| instance.is_some())
    }

    /// Argument at `index`, or `None` if it was not registered (or not a `T`).
    #[must_use]
    pub fn get<T>(&self, index: usize) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slots
            .get(index)
            .and_then(|(_, instance)| instance.as_ref())
            .and_then(Instance::downcast::<T>)
    }

    /// Argument at `index`, failing when it is missing.
    ///
    /// # Errors
    /// Returns an error naming the target and the unresolved token.
    pub fn require<T>(&self, index: usize) -> anyhow::Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if let Some(value) = self.get::<T>(index) {
            return Ok(value);
        }
        match self.slots.get(index) {
            Some((dep, _)) => anyhow::bail!(
                "{}: required dependency #{index} ({}) is not available as {}",
                self.target,
                dep.token(),
                std::any::type_name::<T>()
            ),
            None => anyhow::bail!(
                "{}: dependency #{index} is not declared ({} declared)",
                self.target,
                self.slots.len()
            ),
        }
    }
}

/// A type the registry can construct from already-registered dependencies.
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Constructor parameters in positional order.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Build the value from the resolved parameters.
    ///
    /// # Errors
    /// Any error aborts construction; for modules it is a fatal startup fault.
    fn construct(deps: Dependencies) -> anyhow::Result<Self>;
}
