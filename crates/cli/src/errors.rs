//! CLI error types

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use artifex_remote::RemoteError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a CLI invocation
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Failed to read configuration file {}", path.display())]
    #[diagnostic(
        code(artifex::cli::config_read),
        help("Check file permissions, or pass --config with another path")
    )]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}", path.display())]
    #[diagnostic(
        code(artifex::cli::config_parse),
        help("The file must contain optional [cache] and [remote] tables")
    )]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render output")]
    #[diagnostic(code(artifex::cli::output))]
    Output {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Tracing initialization failed: {message}")]
    #[diagnostic(
        code(artifex::cli::tracing),
        help("Check the RUST_LOG environment variable")
    )]
    Tracing { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] artifex_cache::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),
}

impl CliError {
    #[must_use]
    pub fn tracing(message: impl Into<String>) -> Self {
        Self::Tracing {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn output(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Output {
            source: Box::new(source),
        }
    }
}
