use crate::token::Token;

/// `err` followed by its sources, `": "`-separated.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Lookup failure for `resolve_or_fail`.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no provider registered for token {token}")]
    NotFound { token: Token },

    #[error("provider registered for token {token} is not a {expected}")]
    TypeMismatch {
        token: Token,
        expected: &'static str,
    },
}

impl ResolutionError {
    #[must_use]
    pub fn token(&self) -> &Token {
        match self {
            ResolutionError::NotFound { token } | ResolutionError::TypeMismatch { token, .. } => {
                token
            }
        }
    }
}

/// Why a module was not added to the runtime's module list.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("class '{class}' is not a module")]
    NotAModule { class: &'static str },

    #[error("module '{module}' registered after the runtime was initialized")]
    AfterInit { module: &'static str },
}

/// Runtime lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to register provider '{provider}'")]
    Provider {
        provider: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to instantiate module '{module}'")]
    Instantiate {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to initialize module '{module}'")]
    Init {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' not found")]
    ModuleNotFound { module: &'static str },

    #[error("runtime already failed during startup")]
    AlreadyFailed,

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Supervisor failures.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("invalid worker id '{value}' in {var}")]
    InvalidWorkerId { var: &'static str, value: String },

    #[error("failed to set up the worker backend")]
    Backend(#[source] anyhow::Error),

    #[error("failed to spawn worker {worker_id}")]
    Spawn {
        worker_id: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
