//! Runtime class references.
//!
//! A [`Class`] stands in for "a constructible type" when the type itself cannot be passed
//! around as a value: it carries the type's token, its constructor, and (for modules) the
//! cast to `dyn Module`. Whether a class is a module is a capability fixed at creation:
//! [`Class::module`] has it, [`Class::of`] does not.

use std::fmt;
use std::sync::Arc;

use crate::contracts::Module;
use crate::descriptor::ModuleDescriptor;
use crate::provider::{Injectable, Instance};
use crate::registry::ProviderRegistry;
use crate::token::{Token, short_type_name};

type BuildFn = fn(&ProviderRegistry) -> anyhow::Result<Instance>;
type ModuleCast = fn(&Instance) -> Option<Arc<dyn Module>>;

fn build<T: Injectable>(registry: &ProviderRegistry) -> anyhow::Result<Instance> {
    let value = registry.instantiate::<T>()?;
    Ok(Instance::new(Arc::new(value)))
}

fn prebuilt_only<M: Module>(_registry: &ProviderRegistry) -> anyhow::Result<Instance> {
    anyhow::bail!(
        "module '{}' can only be supplied as a ready instance",
        short_type_name(std::any::type_name::<M>())
    )
}

fn as_module<M: Module>(instance: &Instance) -> Option<Arc<dyn Module>> {
    instance
        .downcast::<M>()
        .map(|module| module as Arc<dyn Module>)
}

/// A constructible type, optionally carrying the module capability.
#[derive(Clone)]
pub struct Class {
    token: Token,
    name: &'static str,
    build: BuildFn,
    module: Option<ModuleCast>,
}

impl Class {
    /// A plain injectable type (a provider).
    #[must_use]
    pub fn of<T: Injectable>() -> Self {
        Self {
            token: Token::of::<T>(),
            name: short_type_name(std::any::type_name::<T>()),
            build: build::<T>,
            module: None,
        }
    }

    /// An injectable type that is also a [`Module`].
    #[must_use]
    pub fn module<M: Module + Injectable>() -> Self {
        Self {
            module: Some(as_module::<M>),
            ..Self::of::<M>()
        }
    }

    /// A module type that is never built by the registry (see `ModuleDescriptor::from_instance`).
    pub(crate) fn prebuilt<M: Module>() -> Self {
        Self {
            token: Token::of::<M>(),
            name: short_type_name(std::any::type_name::<M>()),
            build: prebuilt_only::<M>,
            module: Some(as_module::<M>),
        }
    }

    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_module(&self) -> bool {
        self.module.is_some()
    }

    /// Construct an instance from the registry's current contents.
    ///
    /// # Errors
    /// Propagates the constructor's error.
    pub fn construct(&self, registry: &ProviderRegistry) -> anyhow::Result<Instance> {
        (self.build)(registry)
    }

    /// View an instance of this class as a module; `None` for plain classes.
    #[must_use]
    pub fn module_of(&self, instance: &Instance) -> Option<Arc<dyn Module>> {
        self.module.and_then(|cast| cast(instance))
    }

    /// Record the intent to run this class as a module with `options`.
    #[must_use]
    pub fn mount(self, options: serde_json::Value) -> ModuleDescriptor {
        ModuleDescriptor::new(self, options, None)
    }

    #[must_use]
    pub fn mount_with_token(self, options: serde_json::Value, token: Token) -> ModuleDescriptor {
        ModuleDescriptor::new(self, options, Some(token))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("is_module", &self.is_module())
            .finish_non_exhaustive()
    }
}
