use async_trait::async_trait;

use crate::class::Class;
use crate::context::InitCtx;
use crate::descriptor::ModuleDescriptor;
use crate::provider::Injectable;
use crate::runtime::RuntimeHandle;
use crate::token::{Token, short_type_name};

/// A unit with an `init`/`shutdown` lifecycle driven by the [`Runtime`](crate::Runtime).
///
/// Modules are constructed through [`Injectable`] during the runtime's instantiation
/// pass, initialized in registration order and shut down in reverse order.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Name used in logs and errors. Defaults to the type's name.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Called once right after construction with a weak handle to the owning runtime.
    fn attach_runtime(&self, _runtime: &RuntimeHandle) {}

    /// Startup hook. An error here is fatal to the whole runtime.
    async fn init(&self, ctx: &InitCtx) -> anyhow::Result<()>;

    /// Best-effort teardown. Errors are logged and never stop other modules' teardown.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Mount helpers available on every constructible module type.
pub trait Mountable: Module + Injectable {
    /// The class reference for this module type.
    #[must_use]
    fn class() -> Class {
        Class::module::<Self>()
    }

    /// Pair the module with its options; nothing is constructed yet.
    #[must_use]
    fn mount(options: serde_json::Value) -> ModuleDescriptor {
        Self::class().mount(options)
    }

    /// Like [`mount`](Self::mount), also registering the instance under `token`.
    #[must_use]
    fn mount_with_token(options: serde_json::Value, token: Token) -> ModuleDescriptor {
        Self::class().mount_with_token(options, token)
    }
}

impl<M: Module + Injectable> Mountable for M {}
