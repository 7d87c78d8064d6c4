//! iOS backup manifest index.
//!
//! A backup stores every file under `<root>/<id[0..2]>/<id>` where
//! `id = hex(SHA1(domain + "-" + relativePath))`. The index is loaded from
//! `Manifest.db` once and keyed by that recomputed hash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::domain::{AppError, ManifestEntry, Result};

use super::sqlite_reader::{CellValue, ShardHandle, TableScan};

/// Manifest database file name inside a backup directory.
pub const MANIFEST_DB: &str = "Manifest.db";

const FILES_TABLE: &str = "Files";
const FILES_COLUMNS: &[&str] = &["fileID", "domain", "relativePath", "flags"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "wav", "amr", "silk"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Normalizes a relative path the way backup sources write it.
#[must_use]
pub fn normalize_relative_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Computes the hashed-store identifier for a (domain, relative path) pair.
#[must_use]
pub fn file_id(domain: &str, relative_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(domain.trim().as_bytes());
    hasher.update(b"-");
    hasher.update(normalize_relative_path(relative_path).as_bytes());
    hex::encode(hasher.finalize())
}

/// Case-folded lookup key.
fn folded_key(domain: &str, relative_path: &str) -> String {
    format!(
        "{}-{}",
        domain.trim().to_lowercase(),
        normalize_relative_path(relative_path).to_lowercase()
    )
}

/// Location of an identifier inside the hashed store.
#[must_use]
pub fn physical_path(backup_root: &Path, physical_id: &str) -> PathBuf {
    let prefix = physical_id.get(..2).unwrap_or(physical_id);
    backup_root.join(prefix).join(physical_id)
}

/// File counts for the domains matching a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DomainStats {
    pub total_files: usize,
    pub databases: usize,
    pub images: usize,
    pub audio: usize,
    pub videos: usize,
}

/// In-memory index of a backup's `Manifest.db`.
#[derive(Debug)]
pub struct ManifestIndex {
    root: PathBuf,
    entries: HashMap<String, ManifestEntry>,
    folded: HashMap<String, String>,
}

impl ManifestIndex {
    /// Loads `<backup_root>/Manifest.db`.
    ///
    /// # Errors
    /// Returns `CorruptManifest` if the manifest cannot be opened or its
    /// `Files` table cannot be read.
    pub fn load(backup_root: &Path) -> Result<Self> {
        let manifest_path = backup_root.join(MANIFEST_DB);
        let corrupt = |e: AppError| AppError::CorruptManifest {
            path: manifest_path.clone(),
            message: e.to_string(),
        };

        let handle = ShardHandle::open_read_only(&manifest_path).map_err(corrupt)?;
        let rows = handle
            .scan(&TableScan::new(FILES_TABLE, FILES_COLUMNS))
            .map_err(corrupt)?;

        let index = Self::from_entries(
            backup_root,
            rows.into_iter().filter_map(|row| {
                Some(ManifestEntry {
                    physical_id: row.first()?.to_text()?,
                    domain: row.get(1)?.to_text()?,
                    relative_path: row.get(2)?.to_text().unwrap_or_default(),
                    flags: row.get(3).and_then(CellValue::as_i64).unwrap_or(0),
                })
            }),
        );

        tracing::info!(
            path = %manifest_path.display(),
            entries = index.len(),
            "Loaded backup manifest"
        );

        Ok(index)
    }

    /// Builds an index from already parsed entries.
    pub fn from_entries(
        backup_root: &Path,
        entries: impl IntoIterator<Item = ManifestEntry>,
    ) -> Self {
        let mut map = HashMap::new();
        let mut folded = HashMap::new();
        let mut mismatched = 0usize;

        for mut entry in entries {
            entry.relative_path = normalize_relative_path(&entry.relative_path);
            let key = file_id(&entry.domain, &entry.relative_path);
            if key != entry.physical_id {
                mismatched += 1;
            }
            folded
                .entry(folded_key(&entry.domain, &entry.relative_path))
                .or_insert_with(|| key.clone());
            map.insert(key, entry);
        }

        if mismatched > 0 {
            tracing::debug!(
                mismatched,
                "Manifest entries whose stored id differs from the recomputed hash"
            );
        }

        Self {
            root: backup_root.to_path_buf(),
            entries: map,
            folded,
        }
    }

    /// Backup directory this index belongs to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a logical file to its entry.
    ///
    /// # Errors
    /// Returns `NotFound` if no entry matches, even case-insensitively.
    pub fn entry(&self, domain: &str, relative_path: &str) -> Result<&ManifestEntry> {
        self.entries
            .get(&file_id(domain, relative_path))
            .or_else(|| {
                self.folded
                    .get(&folded_key(domain, relative_path))
                    .and_then(|key| self.entries.get(key))
            })
            .ok_or_else(|| AppError::NotFound {
                domain: domain.to_string(),
                relative_path: relative_path.to_string(),
            })
    }

    /// Resolves a logical file to its hashed-store identifier.
    ///
    /// # Errors
    /// Returns `NotFound` if no entry matches.
    pub fn lookup(&self, domain: &str, relative_path: &str) -> Result<&str> {
        self.entry(domain, relative_path)
            .map(|e| e.physical_id.as_str())
    }

    /// Location of an identifier inside this backup.
    #[must_use]
    pub fn physical_path(&self, physical_id: &str) -> PathBuf {
        physical_path(&self.root, physical_id)
    }

    /// Entries whose domain contains any of the patterns.
    pub fn entries_in<'a>(
        &'a self,
        domain_patterns: &'a [String],
    ) -> impl Iterator<Item = &'a ManifestEntry> + 'a {
        self.entries.values().filter(move |e| {
            domain_patterns
                .iter()
                .any(|p| e.domain.contains(p.as_str()))
        })
    }

    /// Whether any entry belongs to a matching domain.
    #[must_use]
    pub fn has_domain(&self, domain_patterns: &[String]) -> bool {
        self.entries_in(domain_patterns).next().is_some()
    }

    /// Counts files by category for the matching domains.
    #[must_use]
    pub fn domain_stats(&self, domain_patterns: &[String]) -> DomainStats {
        let mut stats = DomainStats::default();
        for entry in self.entries_in(domain_patterns) {
            stats.total_files += 1;
            let ext = entry
                .file_name()
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
                .unwrap_or_default();
            match ext.as_str() {
                "sqlite" | "db" => stats.databases += 1,
                e if IMAGE_EXTENSIONS.contains(&e) => stats.images += 1,
                e if AUDIO_EXTENSIONS.contains(&e) => stats.audio += 1,
                e if VIDEO_EXTENSIONS.contains(&e) => stats.videos += 1,
                _ => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::tempdir;

    fn entry(domain: &str, path: &str, id: &str) -> ManifestEntry {
        ManifestEntry {
            domain: domain.into(),
            relative_path: path.into(),
            physical_id: id.into(),
            flags: 1,
        }
    }

    #[test]
    fn test_file_id_matches_known_backup_hash() {
        // The well-known location of the iOS SMS database.
        assert_eq!(
            file_id("HomeDomain", "Library/SMS/sms.db"),
            "3d0d7e5fb2ce288813306e4d4636395e047a3d28"
        );
    }

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(normalize_relative_path("/Documents//DB/./MM.sqlite"), "Documents/DB/MM.sqlite");
        assert_eq!(normalize_relative_path("Documents\\DB\\MM.sqlite"), "Documents/DB/MM.sqlite");
        assert_eq!(
            file_id("HomeDomain", "Library\\SMS\\sms.db"),
            file_id("HomeDomain", "Library/SMS/sms.db")
        );
    }

    #[test]
    fn test_lookup_roundtrips_recomputed_hash() {
        let pairs = [
            ("AppDomain-com.tencent.xin", "Documents/a1/DB/MM.sqlite"),
            ("AppDomain-com.tencent.xin", "Documents/a1/DB/message_1.sqlite"),
            ("HomeDomain", "Library/SMS/sms.db"),
        ];
        let index = ManifestIndex::from_entries(
            Path::new("/backup"),
            pairs.iter().map(|(d, p)| entry(d, p, &file_id(d, p))),
        );

        for (domain, path) in pairs {
            assert_eq!(index.lookup(domain, path).unwrap(), file_id(domain, path));
        }
    }

    #[test]
    fn test_lookup_keeps_stored_id_and_folds_case() {
        let index = ManifestIndex::from_entries(
            Path::new("/backup"),
            [entry("AppDomain", "Documents/MM.sqlite", "abc123")],
        );

        assert_eq!(index.lookup("AppDomain", "Documents/MM.sqlite").unwrap(), "abc123");
        assert_eq!(index.lookup("appdomain", "documents\\mm.sqlite").unwrap(), "abc123");
        assert_eq!(
            index.physical_path("abc123"),
            PathBuf::from("/backup/ab/abc123")
        );

        let err = index.lookup("AppDomain", "Documents/missing.sqlite").unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_domain_stats() {
        let d = "AppDomain-com.tencent.xin";
        let index = ManifestIndex::from_entries(
            Path::new("/backup"),
            [
                entry(d, "Documents/x/DB/MM.sqlite", "1"),
                entry(d, "Documents/x/Img/a.jpg", "2"),
                entry(d, "Documents/x/Audio/b.amr", "3"),
                entry(d, "Documents/x/Video/c.MP4", "4"),
                entry("HomeDomain", "Library/SMS/sms.db", "5"),
            ],
        );
        let patterns = vec!["com.tencent.xin".to_string()];
        let stats = index.domain_stats(&patterns);
        assert_eq!(
            stats,
            DomainStats {
                total_files: 4,
                databases: 1,
                images: 1,
                audio: 1,
                videos: 1,
            }
        );
        assert!(index.has_domain(&patterns));
        assert!(!index.has_domain(&["com.example".to_string()]));
    }

    #[test]
    fn test_load_from_manifest_db() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join(MANIFEST_DB)).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT,
                                 flags INTEGER, file BLOB);",
        )
        .unwrap();
        let id = file_id("AppDomain-com.tencent.xin", "Documents/u/DB/MM.sqlite");
        conn.execute(
            "INSERT INTO Files VALUES (?1, 'AppDomain-com.tencent.xin', 'Documents/u/DB/MM.sqlite', 1, NULL)",
            [&id],
        )
        .unwrap();
        drop(conn);

        let index = ManifestIndex::load(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index
                .lookup("AppDomain-com.tencent.xin", "Documents/u/DB/MM.sqlite")
                .unwrap(),
            id
        );
    }

    #[test]
    fn test_load_rejects_corrupt_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_DB), vec![0x42_u8; 4096]).unwrap();
        let err = ManifestIndex::load(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::CorruptManifest { .. }));

        let empty = tempdir().unwrap();
        Connection::open(empty.path().join(MANIFEST_DB))
            .unwrap()
            .execute_batch("CREATE TABLE Unrelated (x INTEGER);")
            .unwrap();
        let err = ManifestIndex::load(empty.path()).unwrap_err();
        assert!(matches!(err, AppError::CorruptManifest { .. }));
    }
}
