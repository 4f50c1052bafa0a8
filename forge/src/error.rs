//! Error taxonomy shared by the dispatcher, agents, validators and sinks.
//!
//! Orchestration code that only needs to report failures uses `anyhow`; the
//! variants here exist so callers can decide whether a failure is isolated to
//! one branch of the tree or aborts the whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Typed failures surfaced by forge components.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// The request never produced an HTTP reply (DNS, connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status other than 429.
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Every attempt was answered with 429.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// The provider payload or the model text did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A decoded record violated its shape contract.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The routing reply was not one of the three decision tokens.
    #[error("routing reply {reply:?} is not one of needs-detail, needs-split, ready-to-finalize")]
    RoutingContractViolation { reply: String },

    /// Invalid configuration (unknown provider, missing api key, bad limits).
    #[error("configuration error: {0}")]
    Config(String),

    /// A prompt template failed to render.
    #[error("prompt rendering failed: {0}")]
    Prompt(String),

    /// A second write targeted a path that was already written in this run.
    #[error("path collision: {path} was already written")]
    PathCollision { path: String },

    /// Filesystem failure inside a sink or build service.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ForgeError {
    /// True when the failure should abort the whole run instead of one branch.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, ForgeError::Transport(_) | ForgeError::Config(_))
    }

    /// True when the failure can be absorbed by falling back to a safer treatment.
    pub fn is_recoverable_validation(&self) -> bool {
        matches!(self, ForgeError::Validation(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForgeError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<minijinja::Error> for ForgeError {
    fn from(err: minijinja::Error) -> Self {
        ForgeError::Prompt(err.to_string())
    }
}

pub type Result<T, E = ForgeError> = std::result::Result<T, E>;
