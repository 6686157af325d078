/// Terminates the process. Fatal startup faults and completed signal-driven shutdowns
/// go through this seam so hosts (and tests) can observe or replace the exit.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Exits via `std::process::exit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        tracing::info!(code, "exiting process");
        std::process::exit(code);
    }
}
