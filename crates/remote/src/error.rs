//! Error types for the remote cache tiers

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for remote cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum RemoteError {
    /// The artifact is not in the remote cache
    #[error("{operation}: artifact not found")]
    #[diagnostic(code(artifex::remote::not_found))]
    NotFound {
        /// Operation that was attempted
        operation: String,
    },

    /// Credential missing, expired or rejected
    #[error("{operation}: the request was not authenticated")]
    #[diagnostic(
        code(artifex::remote::unauthorized),
        help("Refresh the token held in the configured credential variable")
    )]
    Unauthorized {
        /// Operation that was attempted
        operation: String,
    },

    /// Credential valid but not allowed to access the project
    #[error("{operation}: access to the project is forbidden")]
    #[diagnostic(code(artifex::remote::forbidden))]
    Forbidden {
        /// Operation that was attempted
        operation: String,
    },

    /// The account's plan does not cover this request
    #[error("{operation}: payment required")]
    #[diagnostic(code(artifex::remote::payment_required))]
    PaymentRequired {
        /// Operation that was attempted
        operation: String,
    },

    /// The server answered with a status this client does not map
    #[error("{operation} failed with HTTP {status}: {message}")]
    #[diagnostic(code(artifex::remote::unexpected_status))]
    UnexpectedStatus {
        /// Operation that was attempted
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        message: String,
    },

    /// The server could not be reached
    #[error("Failed to connect for {operation}: {message}")]
    #[diagnostic(code(artifex::remote::connection_failed))]
    ConnectionFailed {
        /// Operation that was attempted
        operation: String,
        /// Transport error message
        message: String,
    },

    /// Presigned object storage refused a transfer
    #[error("Object storage rejected {operation} with HTTP {status}: {message}")]
    #[diagnostic(
        code(artifex::remote::object_storage),
        help("Signed URLs are short-lived; the transfer is requested again on the next run")
    )]
    ObjectStorage {
        /// Operation that was attempted
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        message: String,
    },

    /// The connection broke while a body was in flight
    #[error("Transfer for {operation} was interrupted: {message}")]
    #[diagnostic(code(artifex::remote::transfer))]
    Transfer {
        /// Operation that was attempted
        operation: String,
        /// Transport error message
        message: String,
    },

    /// The request did not complete in time
    #[error("{operation} timed out")]
    #[diagnostic(code(artifex::remote::timeout))]
    Timeout {
        /// Operation that was attempted
        operation: String,
    },

    /// The downloaded payload is not a recognized artifact
    #[error("invalid cache artifact: {reason}")]
    #[diagnostic(code(artifex::remote::invalid_artifact))]
    InvalidArtifact {
        /// What was wrong with the payload
        reason: String,
    },

    /// The server answered with a body this client cannot understand
    #[error("Invalid response for {operation}: {message}")]
    #[diagnostic(code(artifex::remote::invalid_response))]
    InvalidResponse {
        /// Operation that was attempted
        operation: String,
        /// Description of the problem
        message: String,
    },

    /// Local I/O error while staging a transfer
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(artifex::remote::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// Error from the local cache tier
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] artifex_cache::Error),

    /// Invalid remote configuration
    #[error("Remote configuration error: {message}")]
    #[diagnostic(code(artifex::remote::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A remote identity is configured but no credential resolves
    #[error("The remote cache for '{full_handle}' is configured but no credential was found")]
    #[diagnostic(
        code(artifex::remote::missing_credential),
        help("Export the token in ${variable} or remove the remote configuration")
    )]
    MissingCredential {
        /// The declared remote identity
        full_handle: String,
        /// Environment variable that was consulted
        variable: String,
    },

    /// A transient failure persisted through every attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    #[diagnostic(code(artifex::remote::retry_exhausted))]
    RetryExhausted {
        /// Operation that was retried
        operation: String,
        /// Attempts made
        attempts: usize,
        /// The last error observed
        #[source]
        source: Box<RemoteError>,
    },
}

impl RemoteError {
    /// Create a not-found error
    #[must_use]
    pub fn not_found(operation: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
        }
    }

    /// Create a connection error
    #[must_use]
    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an unexpected-status error
    #[must_use]
    pub fn unexpected_status(
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::UnexpectedStatus {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an object-storage rejection
    #[must_use]
    pub fn object_storage(
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::ObjectStorage {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an interrupted-transfer error
    #[must_use]
    pub fn transfer(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-artifact error
    #[must_use]
    pub fn invalid_artifact(reason: impl Into<String>) -> Self {
        Self::InvalidArtifact {
            reason: reason.into(),
        }
    }

    /// Create an invalid-response error
    #[must_use]
    pub fn invalid_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a retry-exhausted error wrapping the last failure
    #[must_use]
    pub fn retry_exhausted(operation: impl Into<String>, attempts: usize, last: Self) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Map a transport error from `reqwest`
    #[must_use]
    pub fn from_reqwest(operation: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(operation);
        }
        if err.is_connect() {
            return Self::connection(operation, err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::unexpected_status(operation, status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::invalid_response(operation, err.to_string());
        }
        if err.is_builder() {
            return Self::configuration(format!("{operation}: {err}"));
        }
        // Only failures to send the request at all mean the server is unreachable
        if err.is_request() && !err.is_body() {
            return Self::connection(operation, err.to_string());
        }
        Self::transfer(operation, err.to_string())
    }

    /// The innermost error, looking through retry exhaustion
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// HTTP status carried by the root error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Self::NotFound { .. } => Some(404),
            Self::Unauthorized { .. } => Some(401),
            Self::PaymentRequired { .. } => Some(402),
            Self::Forbidden { .. } => Some(403),
            Self::UnexpectedStatus { status, .. } | Self::ObjectStorage { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether retrying the same request might succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Transfer { .. } => true,
            Self::UnexpectedStatus { status, .. } | Self::ObjectStorage { status, .. } => {
                *status >= 500 || *status == 429
            }
            _ => false,
        }
    }
}

/// Result type for remote cache operations
pub type Result<T> = std::result::Result<T, RemoteError>;
