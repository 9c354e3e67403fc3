use crate::errors::CliError;
use crate::settings::Settings;
use artifex_cache::CacheConfig;
use artifex_remote::{RemoteConfig, resolve_credential};
use serde::Serialize;

#[derive(Serialize)]
struct EffectiveConfig<'a> {
    credential: &'static str,
    cache: &'a CacheConfig,
    remote: &'a RemoteConfig,
}

/// Render the effective configuration as TOML, never echoing the credential
pub fn execute(settings: &Settings) -> Result<String, CliError> {
    let credential = resolve_credential(&settings.remote).map_or("unset", |_| "redacted");
    toml::to_string_pretty(&EffectiveConfig {
        credential,
        cache: &settings.cache,
        remote: &settings.remote,
    })
    .map_err(CliError::output)
}
