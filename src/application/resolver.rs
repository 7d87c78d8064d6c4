//! Backup resolution.
//!
//! Maps requested WeChat database kinds to their locations in a backup's
//! hashed store using the manifest index.

use std::collections::BTreeMap;

use crate::domain::{AppError, ExtractConfig, FileKind, ManifestEntry, ResolvedFile, Result};
use crate::infrastructure::ManifestIndex;

/// A kind of file requested from the backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSelector {
    Main,
    Contacts,
    OperationLog,
    /// Every message shard present.
    Messages,
    MessageShard(u32),
}

impl FileSelector {
    fn matches(self, kind: FileKind) -> bool {
        match (self, kind) {
            (Self::Main, FileKind::MainDatabase)
            | (Self::Contacts, FileKind::ContactDatabase)
            | (Self::OperationLog, FileKind::OperationLog)
            | (Self::Messages, FileKind::MessageShard(_)) => true,
            (Self::MessageShard(n), FileKind::MessageShard(m)) => n == m,
            _ => false,
        }
    }

    /// Kinds that must be reported as missing when nothing matches.
    const fn expected_kind(self) -> Option<FileKind> {
        match self {
            Self::Main => Some(FileKind::MainDatabase),
            Self::Contacts => Some(FileKind::ContactDatabase),
            Self::OperationLog => Some(FileKind::OperationLog),
            Self::MessageShard(n) => Some(FileKind::MessageShard(n)),
            Self::Messages => None,
        }
    }

    /// Selectors enabled by an extraction config.
    #[must_use]
    pub fn from_config(config: &ExtractConfig) -> Vec<Self> {
        [
            (config.main, Self::Main),
            (config.contacts, Self::Contacts),
            (config.messages, Self::Messages),
            (config.oplog, Self::OperationLog),
        ]
        .into_iter()
        .filter_map(|(enabled, selector)| enabled.then_some(selector))
        .collect()
    }
}

/// Files found for a request, plus optional kinds that were absent.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Sorted by kind.
    pub files: Vec<ResolvedFile>,
    pub missing: Vec<FileKind>,
}

impl Resolution {
    #[must_use]
    pub fn get(&self, kind: FileKind) -> Option<&ResolvedFile> {
        self.files.iter().find(|f| f.kind == kind)
    }

    /// Sum of the resolved files' sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Resolves the selected WeChat databases in a backup.
///
/// Never touches the backup beyond reading file metadata.
///
/// # Errors
/// Returns `MissingRequiredFile` if the main database is selected but absent
/// from the manifest or from the hashed store.
pub fn resolve(
    index: &ManifestIndex,
    domain_patterns: &[String],
    selectors: &[FileSelector],
) -> Result<Resolution> {
    let resolution = locate(index, domain_patterns, selectors)?;
    if let Some(kind) = resolution.missing.iter().find(|k| k.is_required()) {
        return Err(AppError::MissingRequiredFile {
            logical_name: kind.logical_name(),
        });
    }
    Ok(resolution)
}

/// Like [`resolve`], but a missing main database only lands in `missing`.
///
/// # Errors
/// Returns error if a manifest lookup fails.
pub fn locate(
    index: &ManifestIndex,
    domain_patterns: &[String],
    selectors: &[FileSelector],
) -> Result<Resolution> {
    let candidates = candidates(index, domain_patterns, selectors);

    let mut resolution = Resolution::default();
    for (kind, entry) in candidates {
        let physical_id = index.lookup(&entry.domain, &entry.relative_path)?;
        let physical_path = index.physical_path(physical_id);
        match std::fs::metadata(&physical_path) {
            Ok(meta) if meta.is_file() => {
                tracing::debug!(
                    file = %kind,
                    path = %physical_path.display(),
                    "Resolved backup file"
                );
                resolution.files.push(ResolvedFile {
                    kind,
                    logical_name: kind.logical_name(),
                    physical_path,
                    physical_id: physical_id.to_string(),
                    size_bytes: meta.len(),
                });
            }
            _ => {
                tracing::warn!(
                    file = %kind,
                    path = %physical_path.display(),
                    "Listed in manifest but missing from backup store"
                );
                resolution.missing.push(kind);
            }
        }
    }

    for selector in selectors {
        if let Some(kind) = selector.expected_kind() {
            let found = resolution.files.iter().any(|f| f.kind == kind)
                || resolution.missing.contains(&kind);
            if !found {
                resolution.missing.push(kind);
            }
        }
    }
    resolution.missing.sort();
    resolution.missing.dedup();

    tracing::info!(
        resolved = resolution.files.len(),
        missing = resolution.missing.len(),
        "Resolved WeChat files"
    );

    Ok(resolution)
}

/// Picks one manifest entry per selected kind.
///
/// With several accounts the lexicographically first relative path wins.
fn candidates<'a>(
    index: &'a ManifestIndex,
    domain_patterns: &'a [String],
    selectors: &[FileSelector],
) -> BTreeMap<FileKind, &'a ManifestEntry> {
    let mut chosen: BTreeMap<FileKind, &ManifestEntry> = BTreeMap::new();

    for entry in index.entries_in(domain_patterns).filter(|e| e.is_file()) {
        let Some(kind) = FileKind::from_file_name(entry.file_name()) else {
            continue;
        };
        if !selectors.iter().any(|s| s.matches(kind)) {
            continue;
        }
        match chosen.get(&kind) {
            Some(existing) if existing.relative_path <= entry.relative_path => {
                tracing::warn!(
                    file = %kind,
                    kept = %existing.relative_path,
                    ignored = %entry.relative_path,
                    "Multiple accounts provide this file"
                );
            }
            Some(existing) => {
                tracing::warn!(
                    file = %kind,
                    kept = %entry.relative_path,
                    ignored = %existing.relative_path,
                    "Multiple accounts provide this file"
                );
                chosen.insert(kind, entry);
            }
            None => {
                chosen.insert(kind, entry);
            }
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::file_id;
    use std::path::Path;
    use tempfile::tempdir;

    fn entry(domain: &str, path: &str, id: &str) -> ManifestEntry {
        ManifestEntry {
            domain: domain.into(),
            relative_path: path.into(),
            physical_id: id.into(),
            flags: 1,
        }
    }

    fn store(root: &Path, id: &str, bytes: &[u8]) {
        let dir = root.join(&id[..2]);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(id), bytes).unwrap();
    }

    fn patterns() -> Vec<String> {
        vec!["AppDomain".to_string()]
    }

    #[test]
    fn test_resolve_main_database_by_stored_id() {
        let dir = tempdir().unwrap();
        store(dir.path(), "abc123", b"sqlite");
        let index = ManifestIndex::from_entries(
            dir.path(),
            [entry("AppDomain", "Documents/MM.sqlite", "abc123")],
        );

        let resolution = resolve(&index, &patterns(), &[FileSelector::Main]).unwrap();
        let main = resolution.get(FileKind::MainDatabase).unwrap();
        assert_eq!(main.logical_name, "MM.sqlite");
        assert_eq!(main.physical_path, dir.path().join("ab").join("abc123"));
        assert_eq!(main.size_bytes, 6);
        assert!(resolution.missing.is_empty());
    }

    #[test]
    fn test_missing_main_database_is_an_error() {
        let dir = tempdir().unwrap();
        let index = ManifestIndex::from_entries(dir.path(), []);
        let err = resolve(&index, &patterns(), &[FileSelector::Main]).unwrap_err();
        assert!(matches!(err, AppError::MissingRequiredFile { .. }));

        // Listed in the manifest but absent from the store.
        let index = ManifestIndex::from_entries(
            dir.path(),
            [entry("AppDomain", "Documents/MM.sqlite", "abc123")],
        );
        assert!(resolve(&index, &patterns(), &[FileSelector::Main]).is_err());
    }

    #[test]
    fn test_locate_reports_missing_main_database() {
        let dir = tempdir().unwrap();
        let index = ManifestIndex::from_entries(
            dir.path(),
            [entry("HomeDomain", "Library/SMS/sms.db", "ff0011")],
        );

        let resolution = locate(&index, &patterns(), &[FileSelector::Main]).unwrap();
        assert!(resolution.files.is_empty());
        assert_eq!(resolution.missing, vec![FileKind::MainDatabase]);
    }

    #[test]
    fn test_missing_optional_shards_are_partial() {
        let dir = tempdir().unwrap();
        let domain = "AppDomain-com.tencent.xin";
        let ids: Vec<String> = (1..=2)
            .map(|n| file_id(domain, &format!("Documents/x/DB/message_{n}.sqlite")))
            .collect();
        for id in &ids {
            store(dir.path(), id, b"db");
        }
        let index = ManifestIndex::from_entries(
            dir.path(),
            (1..=2).zip(&ids).map(|(n, id)| {
                entry(domain, &format!("Documents/x/DB/message_{n}.sqlite"), id)
            }),
        );

        let resolution = resolve(
            &index,
            &patterns(),
            &[
                FileSelector::Messages,
                FileSelector::MessageShard(5),
                FileSelector::Contacts,
            ],
        )
        .unwrap();

        let kinds: Vec<_> = resolution.files.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FileKind::MessageShard(1), FileKind::MessageShard(2)]);
        assert_eq!(
            resolution.missing,
            vec![FileKind::ContactDatabase, FileKind::MessageShard(5)]
        );
        assert_eq!(resolution.total_bytes(), 4);
    }

    #[test]
    fn test_first_account_wins() {
        let dir = tempdir().unwrap();
        store(dir.path(), "aa0001", b"a");
        store(dir.path(), "bb0002", b"bb");
        let index = ManifestIndex::from_entries(
            dir.path(),
            [
                entry("AppDomain", "Documents/zzz/DB/MM.sqlite", "bb0002"),
                entry("AppDomain", "Documents/aaa/DB/MM.sqlite", "aa0001"),
            ],
        );

        let resolution = resolve(&index, &patterns(), &[FileSelector::Main]).unwrap();
        assert_eq!(resolution.files[0].physical_id, "aa0001");
    }

    #[test]
    fn test_selectors_from_config() {
        let config = ExtractConfig {
            oplog: false,
            ..ExtractConfig::default()
        };
        assert_eq!(
            FileSelector::from_config(&config),
            vec![
                FileSelector::Main,
                FileSelector::Contacts,
                FileSelector::Messages
            ]
        );
    }
}
