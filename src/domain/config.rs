//! Configuration model.
//!
//! Mirrors the sections of `config.toml`: extraction, merge, export and paths.

use std::path::PathBuf;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Which files an extraction copies and from where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Destination for extracted databases.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Substrings matched against manifest domains.
    #[serde(default = "default_domain_patterns")]
    pub domain_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub main: bool,

    #[serde(default = "default_true")]
    pub contacts: bool,

    #[serde(default = "default_true")]
    pub messages: bool,

    #[serde(default = "default_true")]
    pub oplog: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            domain_patterns: default_domain_patterns(),
            main: true,
            contacts: true,
            messages: true,
            oplog: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./extracted_wechat_files")
}

fn default_domain_patterns() -> Vec<String> {
    vec!["com.tencent.xin".to_string()]
}

const fn default_true() -> bool {
    true
}

/// How duplicate records across shards are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Shards are known not to overlap; identity is (shard, row id).
    RowId,
    /// Shards may overlap; identity is (timestamp, direction, content hash).
    #[default]
    Content,
}

/// Merge tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub dedup: DedupPolicy,

    /// Rows fetched per shard cursor refill.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            dedup: DedupPolicy::default(),
            page_size: default_page_size(),
        }
    }
}

const fn default_page_size() -> usize {
    500
}

/// Export and preview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Default format name (`text`, `json`, `csv`).
    #[serde(default = "default_format")]
    pub format: String,

    /// Speaker label for messages sent by the device owner.
    #[serde(default = "default_self_label")]
    pub self_label: String,

    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,

    /// Only keep text messages.
    #[serde(default = "default_true")]
    pub text_only: bool,

    /// `local`, `utc`, or a fixed offset such as `+08:00`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            self_label: default_self_label(),
            preview_limit: default_preview_limit(),
            text_only: true,
            timezone: default_timezone(),
        }
    }
}

fn default_format() -> String {
    "text".to_string()
}

fn default_self_label() -> String {
    "Me".to_string()
}

const fn default_preview_limit() -> usize {
    20
}

fn default_timezone() -> String {
    "local".to_string()
}

impl ExportConfig {
    /// Fixed offset for rendering times, `None` meaning the host's local zone.
    ///
    /// # Errors
    /// Returns a message if the timezone setting is not recognised.
    pub fn utc_offset(&self) -> Result<Option<FixedOffset>, String> {
        match self.timezone.trim().to_lowercase().as_str() {
            "local" | "" => Ok(None),
            "utc" | "z" => Ok(FixedOffset::east_opt(0)),
            other => parse_offset(other)
                .map(Some)
                .ok_or_else(|| format!("Unknown timezone: {other}. Use: local, utc, +HH:MM")),
        }
    }
}

/// Parses `+HH:MM` / `-HH:MM` / `+HH`.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Override for the MobileSync backup root.
    #[serde(default)]
    pub backup_root: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wechat-backup-handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.extract.main && config.extract.messages);
        assert_eq!(config.extract.domain_patterns, vec!["com.tencent.xin"]);
        assert_eq!(config.merge.dedup, DedupPolicy::Content);
        assert_eq!(config.merge.page_size, 500);
        assert_eq!(config.export.preview_limit, 20);
    }

    #[test]
    fn test_timezone_parsing() {
        let mut export = ExportConfig::default();
        assert_eq!(export.utc_offset(), Ok(None));

        export.timezone = "UTC".into();
        assert_eq!(export.utc_offset(), Ok(FixedOffset::east_opt(0)));

        export.timezone = "+08:00".into();
        assert_eq!(export.utc_offset(), Ok(FixedOffset::east_opt(8 * 3600)));

        export.timezone = "-05".into();
        assert_eq!(export.utc_offset(), Ok(FixedOffset::west_opt(5 * 3600)));

        export.timezone = "mars".into();
        assert!(export.utc_offset().is_err());
    }
}
