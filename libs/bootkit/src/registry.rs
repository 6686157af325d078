//! Flat token → instance registry.
//!
//! Design goals:
//! - One instance per token; re-registering overwrites (existing `Arc`s held by consumers stay valid).
//! - Lookups are sync and side-effect free; a miss is `None`, not an error.
//! - Construction resolves a target's declared dependencies in one pass. Dependencies are
//!   never registered on demand: whatever is not in the registry at construction time is
//!   passed as `None`, so wiring order is the caller's responsibility.
//!
//! Implementation details:
//! - Key = [`Token`]; value = [`Instance`] (an erased `Arc<T>`, downcast on read).
//! - The map lock is never held while a constructor runs, so constructors may read the registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::class::Class;
use crate::error::ResolutionError;
use crate::provider::{Dependencies, Dependency, Injectable, Instance};
use crate::token::Token;

type ProviderMap = HashMap<Token, Instance>;

/// Registry of provider instances keyed by [`Token`].
pub struct ProviderRegistry {
    map: RwLock<ProviderMap>,
}

impl ProviderRegistry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Type-erased lookup.
    #[must_use]
    pub fn resolve_entry(&self, token: &Token) -> Option<Instance> {
        self.map.read().get(token).cloned()
    }

    /// Typed lookup; `None` when absent or registered as another type.
    #[must_use]
    pub fn resolve<T>(&self, token: &Token) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = self.resolve_entry(token)?;
        let typed = entry.downcast::<T>();
        if typed.is_none() {
            tracing::debug!(
                token = ?token,
                registered = entry.type_name(),
                requested = std::any::type_name::<T>(),
                "provider type mismatch on resolve"
            );
        }
        typed
    }

    /// Lookup by the type's own token.
    #[must_use]
    pub fn resolve_type<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<T>(&Token::of::<T>())
    }

    /// Typed lookup that names the token when it fails.
    ///
    /// # Errors
    /// `ResolutionError::NotFound` if nothing is registered under `token`,
    /// `ResolutionError::TypeMismatch` if the entry is not a `T`.
    pub fn resolve_or_fail<T>(&self, token: &Token) -> Result<Arc<T>, ResolutionError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = self
            .resolve_entry(token)
            .ok_or_else(|| ResolutionError::NotFound {
                token: token.clone(),
            })?;
        entry
            .downcast::<T>()
            .ok_or_else(|| ResolutionError::TypeMismatch {
                token: token.clone(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Store `instance` under `token`, replacing any previous entry.
    pub fn register_instance<T>(&self, token: Token, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_entry(token, Instance::new(instance));
    }

    /// Store an already-erased entry under `token`, replacing any previous entry.
    pub fn register_entry(&self, token: Token, instance: Instance) {
        self.map.write().insert(token, instance);
    }

    /// Construct `P` (unless already registered) and store it under `Token::of::<P>()`.
    ///
    /// Calling this twice returns the same instance; construction runs once.
    ///
    /// # Errors
    /// Propagates the constructor's error.
    pub fn register<P: Injectable>(&self) -> anyhow::Result<Arc<P>> {
        let entry = self.register_class(&Class::of::<P>())?;
        entry.downcast::<P>().ok_or_else(|| {
            anyhow::anyhow!(
                "token {} is occupied by a {}",
                Token::of::<P>(),
                entry.type_name()
            )
        })
    }

    /// Type-erased form of [`register`](Self::register).
    ///
    /// # Errors
    /// Propagates the constructor's error.
    pub fn register_class(&self, class: &Class) -> anyhow::Result<Instance> {
        if let Some(existing) = self.resolve_entry(class.token()) {
            tracing::trace!(provider = class.name(), "provider already registered");
            return Ok(existing);
        }

        let built = class.construct(self)?;

        let mut w = self.map.write();
        // A constructor may have registered the same class re-entrantly; first write wins.
        let stored = w.entry(class.token().clone()).or_insert(built).clone();
        drop(w);

        tracing::debug!(provider = class.name(), "provider registered");
        Ok(stored)
    }

    /// Build a `T` from currently registered dependencies without registering it.
    ///
    /// # Errors
    /// Propagates the constructor's error.
    pub fn instantiate<T: Injectable>(&self) -> anyhow::Result<T> {
        let deps = self.resolve_dependencies(std::any::type_name::<T>(), T::dependencies());
        T::construct(deps)
    }

    /// Resolve each declared parameter (override token first, else declared type).
    #[must_use]
    pub fn resolve_dependencies(
        &self,
        target: &'static str,
        declared: Vec<Dependency>,
    ) -> Dependencies {
        let r = self.map.read();
        let slots = declared
            .into_iter()
            .map(|dep| {
                let found = r.get(dep.token()).cloned();
                if found.is_none() {
                    tracing::debug!(
                        target_type = target,
                        token = ?dep.token(),
                        "dependency not registered; passing None"
                    );
                }
                (dep, found)
            })
            .collect();
        Dependencies::new(target, slots)
    }

    /// Remove the entry for `token`; returns it if it was present.
    pub fn unregister(&self, token: &Token) -> Option<Instance> {
        self.map.write().remove(token)
    }

    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        self.map.read().contains_key(token)
    }

    /// Registered tokens, in no particular order.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.map.read().keys().cloned().collect()
    }

    /// Clear everything (useful in tests).
    pub fn clear(&self) {
        self.map.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
