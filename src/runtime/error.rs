//! Errors raised by runtime backends.
//!
//! These describe the transport or runtime-level failure only; the client
//! facade adds the operation name and target identifier.

/// A failure reported by a [`RuntimeService`](super::RuntimeService) backend.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The Docker engine API returned an error or could not be reached.
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// The referenced sandbox, container or image does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up, such as "sandbox".
        kind: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// The runtime refused the request.
    #[error("runtime rejected request: {message}")]
    Rejected {
        /// Reason given by the runtime.
        message: String,
    },

    /// The runtime answered with something this crate cannot interpret.
    #[error("unexpected runtime response: {message}")]
    Unexpected {
        /// What could not be interpreted.
        message: String,
    },
}

impl RuntimeError {
    /// Creates a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a `Rejected` error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Creates an `Unexpected` error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Returns true if the target does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code, ..
            }) => *status_code == 404,
            _ => false,
        }
    }

    /// Returns true if the target was already in the requested state.
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                ..
            })
        )
    }
}
