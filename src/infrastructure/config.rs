//! Configuration file management.
//!
//! Handles loading TOML configuration files and writing the default one.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# WeChat Backup Handler Configuration
# Auto-generated - edit as needed

[extract]
# Where extracted databases are written
output_dir = "./extracted_wechat_files"

# Substrings matched against backup domains
domain_patterns = ["com.tencent.xin"]

# File types to extract
main = true
contacts = true
messages = true
oplog = true

[merge]
# "content" drops copies of a message found in more than one shard,
# matched by (time, direction, content);
# "row_id" trusts that shards never overlap
dedup = "content"

# Rows fetched per shard at a time
page_size = 500

[export]
# Default export format: text, json, csv
format = "text"

# Speaker label for your own messages
self_label = "Me"

# Messages shown by `show`
preview_limit = 20

# Only keep text messages
text_only = true

# Time zone for rendered times: local, utc, or an offset like +08:00
timezone = "local"

[paths]
# Custom MobileSync backup root (optional)
# backup_root = "/Volumes/External/MobileSync/Backup"
"#;

/// Load configuration from file or create default.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Create default configuration file if it doesn't exist.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<()> {
    let config_path = config_file_path();

    if !config_path.exists() {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create config directory", e))?;
        }

        fs::write(&config_path, DEFAULT_CONFIG)
            .map_err(|e| AppError::io("Failed to create default config", e))?;

        tracing::info!(path = %config_path.display(), "Created default configuration");
    }

    Ok(())
}

/// Get the path to the configuration file.
#[must_use]
pub fn config_file_path() -> std::path::PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}
