use crate::logging::LogLevel;
use artifex_cache::{CacheCategory, CacheStorableItem};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "artifex")]
#[command(about = "Fetch and store build artifacts in the local and remote caches")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        help = "Path to the configuration file",
        default_value = "artifex.toml"
    )]
    pub config: PathBuf,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Fetch artifacts, printing a JSON object of the hits")]
    Fetch {
        #[arg(long, help = "Cache category (binaries, selective-tests)", value_parser = parse_category)]
        category: CacheCategory,
        #[arg(long, help = "Only report what is available, without downloading")]
        dry_run: bool,
        #[arg(required = true, value_name = "NAME=HASH", value_parser = parse_request)]
        items: Vec<CacheStorableItem>,
    },
    #[command(about = "Store artifacts in every configured tier")]
    Store {
        #[arg(long, help = "Cache category (binaries, selective-tests)", value_parser = parse_category)]
        category: CacheCategory,
        #[arg(
            required = true,
            value_name = "NAME=HASH[:PATH[,PATH...]]",
            value_parser = parse_store_entry
        )]
        items: Vec<StoreEntry>,
    },
    #[command(about = "Print the effective configuration")]
    Config,
}

/// One `store` argument: the item and the artifact paths making it up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub item: CacheStorableItem,
    pub paths: Vec<PathBuf>,
}

fn parse_category(value: &str) -> Result<CacheCategory, String> {
    value.parse()
}

fn parse_request(value: &str) -> Result<CacheStorableItem, String> {
    let (name, hash) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=HASH, got '{value}'"))?;
    let (name, hash) = (name.trim(), hash.trim());
    if name.is_empty() || hash.is_empty() {
        return Err(format!("expected NAME=HASH, got '{value}'"));
    }
    Ok(CacheStorableItem::new(name, hash))
}

fn parse_store_entry(value: &str) -> Result<StoreEntry, String> {
    let (request, paths) = match value.split_once('=') {
        Some((name, rest)) => match rest.split_once(':') {
            Some((hash, paths)) => (format!("{name}={hash}"), paths),
            None => (value.to_string(), ""),
        },
        None => (value.to_string(), ""),
    };
    let item = parse_request(&request)?;
    let paths = paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();
    Ok(StoreEntry { item, paths })
}
