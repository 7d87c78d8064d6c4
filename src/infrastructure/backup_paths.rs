//! iOS backup discovery.
//!
//! Handles locating Finder/iTunes (MobileSync) backup directories across
//! platforms.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AppError, Result};

use super::manifest::MANIFEST_DB;

/// Backup root relative to the home directory (macOS).
const MACOS_BACKUP_ROOT: &str = "Library/Application Support/MobileSync/Backup";

/// Backup roots relative to the platform data directory (Windows).
const DATA_DIR_BACKUP_ROOTS: &[&str] = &["Apple Computer/MobileSync/Backup", "Apple/MobileSync/Backup"];

const INFO_PLIST: &str = "Info.plist";

/// A backup directory found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    /// Directory name (device UDID).
    pub id: String,
    pub path: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    pub has_info_plist: bool,
}

/// Candidate MobileSync backup roots for this machine.
#[must_use]
pub fn backup_root_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(MACOS_BACKUP_ROOT));
    }
    if let Some(data) = dirs::data_dir() {
        roots.extend(DATA_DIR_BACKUP_ROOTS.iter().map(|p| data.join(p)));
    }
    roots
}

/// Finds the MobileSync backup root.
///
/// # Errors
/// Returns error if no candidate directory exists.
pub fn find_backup_root(override_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = override_root {
        return if root.is_dir() {
            Ok(root.to_path_buf())
        } else {
            Err(AppError::BackupNotFound {
                path: root.to_path_buf(),
            })
        };
    }

    let candidates = backup_root_candidates();
    for path in &candidates {
        if path.is_dir() {
            tracing::debug!("Found backup root at: {}", path.display());
            return Ok(path.clone());
        }
    }

    Err(AppError::Config {
        message: format!("MobileSync backup directory not found. Searched: {candidates:?}"),
    })
}

/// Checks that `path` looks like an iOS backup.
///
/// # Errors
/// Returns `BackupNotFound` if the directory or its manifest is missing.
pub fn validate_backup(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(AppError::BackupNotFound {
            path: path.to_path_buf(),
        });
    }
    let manifest = path.join(MANIFEST_DB);
    if !manifest.is_file() {
        return Err(AppError::BackupNotFound { path: manifest });
    }
    if !path.join(INFO_PLIST).exists() {
        tracing::warn!(
            path = %path.display(),
            "Info.plist not found, backup may be incomplete"
        );
    }
    Ok(())
}

/// Lists backups under the backup root, newest first.
///
/// # Errors
/// Returns error if the backup root cannot be found or read.
pub fn discover_backups(override_root: Option<&Path>) -> Result<Vec<BackupInfo>> {
    let root = find_backup_root(override_root)?;
    let entries = std::fs::read_dir(&root)
        .map_err(|e| AppError::io(format!("Failed to read {}", root.display()), e))?;

    let mut backups: Vec<BackupInfo> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join(MANIFEST_DB).is_file())
        .map(|path| {
            let last_modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            BackupInfo {
                id: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
                has_info_plist: path.join(INFO_PLIST).exists(),
                last_modified,
                path,
            }
        })
        .collect();

    backups.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    tracing::debug!(root = %root.display(), count = backups.len(), "Discovered backups");

    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discover_only_lists_dirs_with_manifest() {
        let root = tempdir().unwrap();
        let good = root.path().join("00008030-AAAA");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::write(good.join(MANIFEST_DB), b"").unwrap();
        std::fs::create_dir_all(root.path().join("not-a-backup")).unwrap();

        let backups = discover_backups(Some(root.path())).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].id, "00008030-AAAA");
        assert!(!backups[0].has_info_plist);
    }

    #[test]
    fn test_validate_backup() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            validate_backup(dir.path()),
            Err(AppError::BackupNotFound { .. })
        ));

        std::fs::write(dir.path().join(MANIFEST_DB), b"").unwrap();
        assert!(validate_backup(dir.path()).is_ok());
        assert!(validate_backup(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_override_root_must_exist() {
        let err = find_backup_root(Some(Path::new("/definitely/not/here"))).unwrap_err();
        assert!(matches!(err, AppError::BackupNotFound { .. }));
    }
}
