use std::fmt;
use std::sync::Arc;

use crate::class::Class;
use crate::contracts::Module;
use crate::provider::Instance;
use crate::token::Token;

/// A constructed module: the registry entry and its `dyn Module` view of the same `Arc`.
#[derive(Clone)]
pub(crate) struct ModuleInstance {
    pub(crate) entry: Instance,
    pub(crate) module: Arc<dyn Module>,
}

/// A module class paired with its options and an optional lookup token.
///
/// Produced by mounting ([`Class::mount`], [`Mountable::mount`](crate::Mountable::mount));
/// the instance stays empty until the runtime's instantiation pass, unless the descriptor
/// was built from a ready instance.
#[derive(Clone)]
pub struct ModuleDescriptor {
    class: Class,
    instance: Option<ModuleInstance>,
    options: serde_json::Value,
    token: Option<Token>,
}

impl ModuleDescriptor {
    pub(crate) fn new(class: Class, options: serde_json::Value, token: Option<Token>) -> Self {
        Self {
            class,
            instance: None,
            options,
            token,
        }
    }

    /// Descriptor for a module that was constructed by the caller.
    #[must_use]
    pub fn from_instance<M: Module>(module: Arc<M>, options: serde_json::Value) -> Self {
        let entry = Instance::new(module.clone());
        Self {
            class: Class::prebuilt::<M>(),
            instance: Some(ModuleInstance {
                entry,
                module: module as Arc<dyn Module>,
            }),
            options,
            token: None,
        }
    }

    /// Also register the instance under `token`.
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn class(&self) -> &Class {
        &self.class
    }

    #[must_use]
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    #[must_use]
    pub fn is_instantiated(&self) -> bool {
        self.instance.is_some()
    }

    pub(crate) fn instance(&self) -> Option<&ModuleInstance> {
        self.instance.as_ref()
    }

    pub(crate) fn set_instance(&mut self, instance: ModuleInstance) {
        self.instance = Some(instance);
    }
}

impl From<Class> for ModuleDescriptor {
    /// A bare class: empty options, no token.
    fn from(class: Class) -> Self {
        class.mount(serde_json::Value::Null)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("class", &self.class.name())
            .field("instantiated", &self.is_instantiated())
            .field("options", &self.options)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::context::InitCtx;
    use crate::contracts::Mountable;
    use crate::provider::{Dependencies, Injectable};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

    struct Lazy;

    impl Injectable for Lazy {
        fn construct(_deps: Dependencies) -> anyhow::Result<Self> {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(Lazy)
        }
    }

    #[async_trait::async_trait]
    impl Module for Lazy {
        async fn init(&self, _ctx: &InitCtx) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn mounting_does_not_construct() {
        let desc = Lazy::mount_with_token(json!({"port": 80}), Token::named("lazy"));
        assert!(!desc.is_instantiated());
        assert_eq!(desc.options()["port"], 80);
        assert_eq!(desc.token(), Some(&Token::named("lazy")));
        assert_eq!(desc.class().name(), "Lazy");
        assert!(desc.class().is_module());
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bare_class_becomes_descriptor_with_empty_options() {
        let desc = ModuleDescriptor::from(Lazy::class());
        assert!(desc.options().is_null());
        assert!(desc.token().is_none());
    }

    #[test]
    fn ready_instance_descriptor() {
        let desc = ModuleDescriptor::from_instance(Arc::new(Lazy), json!({}))
            .with_token(Token::named("ready"));
        assert!(desc.is_instantiated());
        assert_eq!(desc.instance().unwrap().module.name(), "Lazy");
        assert!(desc.class().construct(&crate::ProviderRegistry::new()).is_err());
    }
}
