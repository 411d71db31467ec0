//! Response cache command handlers.

use anyhow::Result;
use tracing::info;

use usage_governor::{GovernorConfig, ResponseCache};

use super::CacheSubcommand;

/// Handle `usage-governor cache` subcommands.
pub(crate) fn cmd_cache(config: &GovernorConfig, action: CacheSubcommand) -> Result<i32> {
    let cache = ResponseCache::from_config(config)?;

    match action {
        CacheSubcommand::Stats => {
            let stats = cache.stats();
            println!("Entries:  {}", stats.total_entries);
            println!("Hits:     {}", stats.total_hits);
            println!("Size:     {:.2} MB", stats.approximate_size_mb());
            println!("TTL:      {}s", cache.ttl_secs());
        }
        CacheSubcommand::Purge => {
            let removed = cache.purge_expired();
            info!(removed, "purged expired cache entries");
            println!("Removed {removed} expired entries.");
        }
        CacheSubcommand::Clear => {
            cache.clear();
            println!("Cleared response cache.");
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_cache_clear_persists() {
        let dir = TempDir::new().unwrap();
        let config = GovernorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..GovernorConfig::default()
        };
        {
            let cache = ResponseCache::from_config(&config).unwrap();
            cache.put("greeting", None, &json!({"a": 1}), "hello");
        }
        assert_eq!(cmd_cache(&config, CacheSubcommand::Clear).unwrap(), 0);
        let reopened = ResponseCache::from_config(&config).unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_cache_stats_on_fresh_dir() {
        let dir = TempDir::new().unwrap();
        let config = GovernorConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..GovernorConfig::default()
        };
        assert_eq!(cmd_cache(&config, CacheSubcommand::Stats).unwrap(), 0);
    }
}
