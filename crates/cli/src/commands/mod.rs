//! Subcommand implementations
//!
//! Each command returns the text to print on stdout. Alerts raised while it
//! runs are left in the shared channel for the caller to report.

pub mod config;
pub mod fetch;
pub mod store;

use crate::cli::Commands;
use crate::errors::CliError;
use crate::settings::Settings;
use artifex_cache::Alerts;
use artifex_remote::CacheFactory;

pub async fn execute(
    command: Commands,
    settings: &Settings,
    alerts: &Alerts,
) -> Result<String, CliError> {
    let factory = CacheFactory::new(
        settings.cache.clone(),
        settings.remote.clone(),
        alerts.clone(),
    );
    match command {
        Commands::Fetch {
            category,
            dry_run,
            items,
        } => fetch::execute(&factory, alerts, category, items, dry_run).await,
        Commands::Store { category, items } => store::execute(&factory, category, items).await,
        Commands::Config => config::execute(settings),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::settings::Settings;
    use artifex_cache::CacheConfig;
    use artifex_remote::RemoteConfig;
    use std::path::Path;

    /// Settings with an explicit cache root and no remote identity
    pub fn local_settings(root: &Path) -> Settings {
        Settings {
            cache: CacheConfig {
                cache_root: Some(root.to_path_buf()),
            },
            remote: RemoteConfig {
                token_env: "ARTIFEX_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
                ..RemoteConfig::default()
            },
        }
    }
}
