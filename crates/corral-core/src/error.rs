//! Error types and result aliases for Corral.
//!
//! The error taxonomy mirrors the agent's propagation policy: transient I/O
//! failures are retried by the next convergence cycle, state conflicts are
//! informational, precondition failures surface at the API boundary, and
//! configuration errors are fatal at start-up.

/// The result type used throughout Corral.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cell agent operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The executor has no container at the given identity.
    #[error("container not found: {identity}")]
    ContainerNotFound {
        /// The container identity that was looked up.
        identity: String,
    },

    /// The BBS has no actual LRP rows for the given slot.
    #[error("actual LRP not found: {process_id} index {index}")]
    LrpNotFound {
        /// The process the slot belongs to.
        process_id: String,
        /// The slot index.
        index: i32,
    },

    /// The BBS has no task row with the given identifier.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The task identifier that was looked up.
        task_id: String,
    },

    /// A compare-and-swap was lost or a row changed underneath an operation.
    #[error("state conflict: {message}")]
    StateConflict {
        /// Description of the conflict.
        message: String,
    },

    /// The record is assigned to a different cell.
    #[error("work belongs to cell {owner}, not {cell_id}")]
    WrongCell {
        /// The cell that owns the record.
        owner: String,
        /// The cell that attempted the operation.
        cell_id: String,
    },

    /// The executor refused an allocation for lack of capacity.
    #[error("insufficient resources: {message}")]
    InsufficientResources {
        /// Description of the shortfall.
        message: String,
    },

    /// The requested root filesystem is not provided by this cell.
    #[error("unknown root filesystem: {root_fs}")]
    UnknownRootFs {
        /// The root filesystem that was requested.
        root_fs: String,
    },

    /// The cell is evacuating and accepts no new work.
    #[error("cell is evacuating")]
    Evacuating,

    /// A container identity could not be derived or parsed.
    #[error("invalid container identity: {message}")]
    InvalidIdentity {
        /// Description of what made the identity invalid.
        message: String,
    },

    /// A configuration flag or environment value is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// An HTTP exchange with the BBS or executor failed.
    #[error("http error: {message}")]
    Http {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a container-not-found error.
    #[must_use]
    pub fn container_not_found(identity: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            identity: identity.into(),
        }
    }

    /// Creates a state conflict error.
    #[must_use]
    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    /// Creates an insufficient-resources error.
    #[must_use]
    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        Self::InsufficientResources {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an HTTP error without an underlying cause.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an HTTP error with a source cause.
    #[must_use]
    pub fn http_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Http {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when the error names a missing record rather than a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound { .. } | Self::LrpNotFound { .. } | Self::TaskNotFound { .. }
        )
    }

    /// Returns true when retrying on the next convergence cycle is the right policy.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::StateConflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
