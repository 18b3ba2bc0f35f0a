//! Error taxonomy shared by every pipeline stage.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, AqlError>;

/// Boxed driver error carried by [`AqlError::Execution`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failures surfaced by the query pipeline.
///
/// Every variant is terminal for the request; nothing in the engine retries.
#[derive(Debug, Error)]
pub enum AqlError {
    /// Query text is malformed. `position` is a character offset into the text.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// Character offset of the offending token.
        position: usize,
        /// Human-readable description.
        message: String,
    },
    /// Query text is well-formed but semantically invalid.
    #[error("illegal query: {0}")]
    IllegalQuery(String),
    /// Query is valid but uses a feature the caller's edition does not have.
    #[error("capability '{capability}' is not available: {message}")]
    Capability {
        /// Name of the missing capability.
        capability: &'static str,
        /// Human-readable description.
        message: String,
    },
    /// The AST references a table/field pairing with no schema mapping.
    #[error("compilation failed: {0}")]
    Compilation(String),
    /// Backend I/O or SQL failure.
    #[error("execution failed: {message}")]
    Execution {
        /// Human-readable description.
        message: String,
        /// Underlying driver error, when one exists.
        #[source]
        source: Option<BoxError>,
    },
    /// The caller cancelled a running stream.
    #[error("query cancelled")]
    Cancelled,
}

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the client (4xx).
    Client,
    /// Valid input the caller is not allowed to run (403).
    Forbidden,
    /// Engine bug (5xx).
    Internal,
    /// Backend failure or cancellation.
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Client => write!(f, "client"),
            ErrorKind::Forbidden => write!(f, "forbidden"),
            ErrorKind::Internal => write!(f, "internal"),
            ErrorKind::Backend => write!(f, "backend"),
        }
    }
}

impl AqlError {
    /// Builds an [`AqlError::Syntax`].
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        AqlError::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Builds an [`AqlError::IllegalQuery`].
    pub fn illegal(message: impl Into<String>) -> Self {
        AqlError::IllegalQuery(message.into())
    }

    /// Builds an [`AqlError::Capability`].
    pub fn capability(capability: &'static str, message: impl Into<String>) -> Self {
        AqlError::Capability {
            capability,
            message: message.into(),
        }
    }

    /// Builds an [`AqlError::Compilation`].
    pub fn compilation(message: impl Into<String>) -> Self {
        AqlError::Compilation(message.into())
    }

    /// Builds an [`AqlError::Execution`] without an underlying driver error.
    pub fn execution(message: impl Into<String>) -> Self {
        AqlError::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a driver error as [`AqlError::Execution`].
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        AqlError::Execution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            AqlError::Syntax { .. } => "SyntaxError",
            AqlError::IllegalQuery(_) => "IllegalQueryError",
            AqlError::Capability { .. } => "CapabilityError",
            AqlError::Compilation(_) => "CompilationError",
            AqlError::Execution { .. } => "ExecutionError",
            AqlError::Cancelled => "Cancelled",
        }
    }

    /// Classifies the error for transports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AqlError::Syntax { .. } | AqlError::IllegalQuery(_) => ErrorKind::Client,
            AqlError::Capability { .. } => ErrorKind::Forbidden,
            AqlError::Compilation(_) => ErrorKind::Internal,
            AqlError::Execution { .. } | AqlError::Cancelled => ErrorKind::Backend,
        }
    }
}

impl From<rusqlite::Error> for AqlError {
    fn from(err: rusqlite::Error) -> Self {
        AqlError::backend("sqlite statement failed", err)
    }
}

/// Formats an error together with its code, e.g. `[SyntaxError] ...`.
pub struct AqlErrorWithCode<'a>(pub &'a AqlError);

impl fmt::Display for AqlErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
