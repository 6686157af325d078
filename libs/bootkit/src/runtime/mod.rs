//! Module runtime: registration, ordered init, reverse-ordered shutdown.

mod exit;
mod lifecycle;
mod options;
mod shutdown;

pub use exit::{ProcessExit, StdProcessExit};
pub use lifecycle::{
    ModuleInfo, ModuleState, Runtime, RuntimeEvent, RuntimeHandle, RuntimeListener, RuntimeState,
};
pub use options::{RuntimeMeta, RuntimeOptions, ShutdownOptions};
pub use shutdown::{ShutdownSignal, wait_for_shutdown};
