//! Remote artifact cache tiers for artifex
//!
//! This crate implements the remote half of the artifact cache:
//! - HTTP clients for the project-scoped binary cache and the account-scoped
//!   module cache
//! - The multipart upload driver and the retry policy shared by both
//! - [`RemoteStorage`], a remote tier that fans a batch out over concurrent
//!   tasks and downgrades per-item failures to alerts
//! - [`CacheFactory`], which wires the local and remote tiers from configuration

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod failures;
pub mod multipart;
pub mod retry;
pub mod storage;

pub use client::{HttpChannel, ModuleCacheClient, ProjectCacheClient, RemoteCacheClient, StatusMapping};
pub use config::{DEFAULT_TOKEN_ENV, RemoteConfig, RemoteVariant, RetryConfig};
pub use error::{RemoteError, Result};
pub use factory::{CacheFactory, resolve_credential};
pub use failures::{Direction, FailureClass, FailureReport};
pub use multipart::{CompletedPart, MultipartUploader, PartRequest};
pub use retry::RetryPolicy;
pub use storage::RemoteStorage;
