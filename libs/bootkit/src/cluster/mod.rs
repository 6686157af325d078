//! Supervised multi-process worker pool.

pub mod backend;
pub mod role;
pub mod settings;
mod supervisor;

pub use backend::{LocalProcessBackend, WorkerBackend, WorkerExit, WorkerHandle};
pub use role::{Role, WORKER_ID_ENV, WorkerId};
pub use settings::{AutoRestart, ClusterSettings, WorkerSettings};
pub use supervisor::{ClusterEvent, ClusterListener, ClusterOptions, ClusteredCore, WorkerInfo};
