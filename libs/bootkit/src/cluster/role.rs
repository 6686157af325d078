use crate::error::ClusterError;

/// Environment variable carrying the worker id into re-launched worker processes.
pub const WORKER_ID_ENV: &str = "BOOTKIT_WORKER_ID";

pub type WorkerId = u32;

/// The role of the current process in a supervised pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Worker(WorkerId),
}

impl Role {
    /// Read the role from [`WORKER_ID_ENV`]: unset means primary.
    ///
    /// # Errors
    /// `ClusterError::InvalidWorkerId` if the variable is set but not a number. Treating a
    /// garbled value as primary would make a worker fork its own pool.
    pub fn detect() -> Result<Self, ClusterError> {
        Self::from_env_value(std::env::var(WORKER_ID_ENV).ok().as_deref())
    }

    pub(crate) fn from_env_value(value: Option<&str>) -> Result<Self, ClusterError> {
        match value {
            None => Ok(Role::Primary),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Role::Worker)
                .map_err(|_| ClusterError::InvalidWorkerId {
                    var: WORKER_ID_ENV,
                    value: raw.to_owned(),
                }),
        }
    }

    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Role::Primary)
    }

    #[must_use]
    pub fn worker_id(self) -> Option<WorkerId> {
        match self {
            Role::Primary => None,
            Role::Worker(id) => Some(id),
        }
    }
}
