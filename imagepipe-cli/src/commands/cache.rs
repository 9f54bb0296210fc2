//! Cache management CLI commands.

use std::path::Path;

use clap::Subcommand;
use imagepipe::cache::DiskDataCache;
use imagepipe::config::format_size;

use crate::error::CliError;
use crate::runner::load_config;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the disk cache, removing all cached data
    Clear,
    /// Show disk cache statistics
    Stats,
}

/// Run a cache subcommand.
pub async fn run(action: CacheAction, config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let cache_dir = &config.cache.directory;

    if !cache_dir.exists() {
        println!("Disk cache: {} (not created yet)", cache_dir.display());
        return Ok(());
    }

    let cache = DiskDataCache::new(cache_dir.clone(), config.cache.disk_size)
        .map_err(CliError::Cache)?;

    match action {
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", cache_dir.display());
            let stats = cache.stats();
            cache.clear().await;
            println!(
                "Deleted {} files, freed {}",
                stats.entry_count,
                format_size(stats.size_bytes)
            );
        }
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("Disk cache: {}", cache_dir.display());
            println!("  Files: {}", stats.entry_count);
            println!(
                "  Size:  {} of {}",
                format_size(stats.size_bytes),
                format_size(cache.max_size_bytes())
            );
            if !config.cache.disk_enabled {
                println!("  (disabled in configuration)");
            }
        }
    }
    Ok(())
}
