#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
//! bootkit - module lifecycle runtime with a flat provider registry and a supervised
//! multi-process worker pool.
//!
//! ```ignore
//! let runtime = Runtime::new(
//!     RuntimeOptions::new()
//!         .provider(Class::of::<SystemClock>())
//!         .module(Greeter::mount(json!({"greeting": "hello"})))
//!         .module(Heartbeat::class()),
//! )?;
//! runtime.init().await?;
//! runtime.closed().await;
//! ```

pub mod class;
pub mod cluster;
pub mod config;
pub mod context;
pub mod contracts;
pub mod descriptor;
pub mod error;
mod events;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod token;

pub use class::Class;
pub use cluster::{ClusterEvent, ClusterOptions, ClusterSettings, ClusteredCore, Role};
pub use config::{AppConfig, ConfigError};
pub use context::{InitCtx, OptionsError};
pub use contracts::{Module, Mountable};
pub use descriptor::ModuleDescriptor;
pub use error::{ClusterError, RegistrationError, ResolutionError, RuntimeError};
pub use provider::{Dependencies, Dependency, Injectable, Instance};
pub use registry::ProviderRegistry;
pub use runtime::{
    ModuleInfo, ModuleState, ProcessExit, Runtime, RuntimeEvent, RuntimeHandle, RuntimeMeta,
    RuntimeOptions, RuntimeState,
};
pub use storage::Storage;
pub use token::Token;

// Re-exported for module implementors.
pub use async_trait::async_trait;
