//! Error types for the certmesh pipeline

use thiserror::Error;

/// Main error type for certmesh operations
///
/// Every failure is fatal: the pipeline has exactly one writer, no retries,
/// and aborts on the first error so no partial bundle is ever published.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A required external tool is missing
    #[error("required tool not found: {tool} - {hint}")]
    ToolNotFound {
        /// The tool that was not found
        tool: String,
        /// Hint for how to install it
        hint: String,
    },

    /// A CA, certificate, or keystore/truststore operation failed
    #[error("generation failed: {operation} - {message}")]
    Generation {
        /// The operation that failed (a composed command line or library call)
        operation: String,
        /// Error message
        message: String,
    },

    /// A secret delete or create operation failed
    #[error("publish failed: {operation} - {message}\n  inspect with: {hint}")]
    Publish {
        /// The operation that failed
        operation: String,
        /// Error message
        message: String,
        /// A command for manual inspection of the secret store
        hint: String,
    },

    /// A required artifact has no backing file on disk
    #[error("missing input file: {0}")]
    MissingInput(String),

    /// Invalid configuration or profile descriptor
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a generation error for the given operation
    pub fn generation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error with a manual-inspection hint
    pub fn publish(
        operation: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Publish {
            operation: operation.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid-config error with the given message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
