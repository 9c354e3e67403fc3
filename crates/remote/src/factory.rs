//! Startup wiring of the cache tiers
//!
//! A remote tier exists only when a remote identity is declared. Declaring one
//! without a resolvable credential is a configuration error, unlike the
//! per-item failures the remote tier absorbs at runtime.

use crate::client::{
    HttpChannel, ModuleCacheClient, ProjectCacheClient, StatusMapping, http_client,
};
use crate::config::{RemoteConfig, RemoteVariant};
use crate::error::{RemoteError, Result};
use crate::multipart::MultipartUploader;
use crate::retry::RetryPolicy;
use crate::storage::RemoteStorage;
use artifex_cache::{Alerts, CacheConfig, CacheDirectories, CacheStorage, CacheStoring, LocalStorage};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

/// Read the credential named by `config.token_env` from the environment
#[must_use]
pub fn resolve_credential(config: &RemoteConfig) -> Option<SecretString> {
    std::env::var(&config.token_env)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .map(SecretString::from)
}

/// Builds the cache façade from configuration
#[derive(Debug, Clone)]
pub struct CacheFactory {
    cache: CacheConfig,
    remote: RemoteConfig,
    alerts: Alerts,
    credential: Option<SecretString>,
}

impl CacheFactory {
    /// Factory for the given configuration, reporting through `alerts`
    #[must_use]
    pub fn new(cache: CacheConfig, remote: RemoteConfig, alerts: Alerts) -> Self {
        Self {
            cache,
            remote,
            alerts,
            credential: None,
        }
    }

    /// Use `credential` instead of reading it from the environment
    #[must_use]
    pub fn with_credential(mut self, credential: SecretString) -> Self {
        self.credential = Some(credential);
        self
    }

    /// The declared remote identity, if any
    #[must_use]
    pub fn full_handle(&self) -> Option<&str> {
        self.remote
            .full_handle
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// Build the local tier
    pub fn local(&self) -> Result<LocalStorage> {
        let root = self.cache.resolve_root()?;
        debug!(root = %root.display(), "Resolved cache root");
        Ok(LocalStorage::new(
            CacheDirectories::new(root),
            self.alerts.clone(),
        ))
    }

    /// Build the façade: always a local tier, plus a remote tier when declared
    pub fn build(&self) -> Result<CacheStorage> {
        let local = self.local()?;
        let remote = self.remote_tier(&local)?;
        info!(
            remote = remote.is_some(),
            variant = ?self.remote.variant,
            "Cache configured"
        );
        Ok(CacheStorage::new(Arc::new(local), remote))
    }

    /// Build a project-scoped client, when that variant is configured
    pub fn project_client(&self) -> Result<Option<ProjectCacheClient>> {
        let Some(full_handle) = self.full_handle() else {
            return Ok(None);
        };
        if self.remote.variant != RemoteVariant::Project {
            return Ok(None);
        }
        let token = self.credential(full_handle)?;
        let http = http_client(&self.remote)?;
        let channel = HttpChannel::new(http, self.remote.server_url(), token, StatusMapping::Generic);
        ProjectCacheClient::new(channel, full_handle).map(Some)
    }

    fn credential(&self, full_handle: &str) -> Result<SecretString> {
        self.credential
            .clone()
            .or_else(|| resolve_credential(&self.remote))
            .ok_or_else(|| RemoteError::MissingCredential {
                full_handle: full_handle.to_string(),
                variable: self.remote.token_env.clone(),
            })
    }

    fn remote_tier(&self, local: &LocalStorage) -> Result<Option<Arc<dyn CacheStoring>>> {
        let Some(full_handle) = self.full_handle() else {
            return Ok(None);
        };
        let token = self.credential(full_handle)?;
        let http = http_client(&self.remote)?;
        let retry = RetryPolicy::new(self.remote.retry.clone());
        let uploader = MultipartUploader::new(
            http.clone(),
            self.remote.multipart_chunk_size,
            retry.clone(),
        );
        let limit = self.remote.concurrency_limit;

        let tier: Arc<dyn CacheStoring> = match self.remote.variant {
            RemoteVariant::Project => {
                let channel =
                    HttpChannel::new(http, self.remote.server_url(), token, StatusMapping::Generic);
                let client = ProjectCacheClient::new(channel, full_handle)?;
                Arc::new(RemoteStorage::new(
                    client,
                    local.clone(),
                    self.alerts.clone(),
                    retry,
                    uploader,
                    limit,
                ))
            }
            RemoteVariant::Module => {
                let server = HttpChannel::new(
                    http.clone(),
                    self.remote.server_url(),
                    token.clone(),
                    StatusMapping::Typed,
                );
                let cache = HttpChannel::new(
                    http,
                    self.remote.module_cache_url(),
                    token,
                    StatusMapping::Typed,
                );
                let client = ModuleCacheClient::new(server, cache, full_handle)?;
                Arc::new(RemoteStorage::new(
                    client,
                    local.clone(),
                    self.alerts.clone(),
                    retry,
                    uploader,
                    limit,
                ))
            }
        };
        Ok(Some(tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_config(tmp: &TempDir) -> CacheConfig {
        CacheConfig {
            cache_root: Some(tmp.path().join("cache")),
        }
    }

    #[test]
    fn test_no_identity_means_local_only() {
        let tmp = TempDir::new().unwrap();
        let factory = CacheFactory::new(cache_config(&tmp), RemoteConfig::default(), Alerts::new());
        let storage = factory.build().unwrap();
        assert!(!storage.has_remote());
        assert!(factory.project_client().unwrap().is_none());
    }

    #[test]
    fn test_identity_without_credential_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let remote = RemoteConfig {
            full_handle: Some("acme/app".into()),
            token_env: "ARTIFEX_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..RemoteConfig::default()
        };
        let factory = CacheFactory::new(cache_config(&tmp), remote, Alerts::new());
        assert!(matches!(
            factory.build(),
            Err(RemoteError::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_identity_with_credential_builds_remote() {
        let tmp = TempDir::new().unwrap();
        for variant in [RemoteVariant::Project, RemoteVariant::Module] {
            let remote = RemoteConfig {
                full_handle: Some("acme/app".into()),
                variant,
                ..RemoteConfig::default()
            };
            let factory = CacheFactory::new(cache_config(&tmp), remote, Alerts::new())
                .with_credential(SecretString::from("token"));
            assert!(factory.build().unwrap().has_remote());
        }
    }

    #[test]
    fn test_malformed_handle_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let remote = RemoteConfig {
            full_handle: Some("acme".into()),
            ..RemoteConfig::default()
        };
        let factory = CacheFactory::new(cache_config(&tmp), remote, Alerts::new())
            .with_credential(SecretString::from("token"));
        assert!(matches!(
            factory.build(),
            Err(RemoteError::Configuration { .. })
        ));
    }
}
