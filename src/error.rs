//! Engine-wide error taxonomy.
//!
//! Request-path errors propagate to the caller; detached-task errors are
//! logged and swallowed by the spawning site. Each variant maps to a stable
//! kind string via [`EngineError::kind`] so a transport collaborator can
//! translate errors without matching on variants.

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A referenced entity does not exist (or is not owned by the caller).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity category ("memory", "conversation", ...).
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// Input was rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The `(user_id, content_hash)` uniqueness constraint fired.
    #[error("duplicate memory for user {user_id}")]
    DuplicateMemory {
        /// Owner of the colliding memory.
        user_id: String,
    },

    /// A required external dependency could not be reached.
    #[error("{dependency} unavailable: {message}")]
    DependencyUnavailable {
        /// Which dependency failed (row store, index, embedder, llm).
        dependency: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// A per-call deadline was exceeded.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that hit its deadline.
        operation: &'static str,
    },

    /// Extractor output could not be parsed.
    #[error("extraction parse error: {0}")]
    ExtractionParse(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable kind string for transport mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::DuplicateMemory { .. } => "duplicate_memory",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::ExtractionParse(_) => "extraction_parse",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            _ => Self::DependencyUnavailable {
                dependency: "row store",
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

/// Returns `true` if a sqlx error is a unique-constraint violation.
///
/// Used by the memory store to translate `(user_id, content_hash)`
/// collisions into [`EngineError::DuplicateMemory`].
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
