//! Backup extraction service.
//!
//! Orchestrates manifest loading, resolution and the per-file atomic copy.

use std::path::{Path, PathBuf};

use crate::domain::{ExtractConfig, FileKind, Result};
use crate::infrastructure::{copy_atomic, validate_backup, CopyOutcome, DomainStats, ManifestIndex};

use super::resolver::{locate, resolve, FileSelector, Resolution};

/// Options for extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub selectors: Vec<FileSelector>,
    /// Substrings matched against manifest domains.
    pub domain_patterns: Vec<String>,
    pub output_dir: PathBuf,
    /// Re-copy files even when a verified copy exists.
    pub force: bool,
}

impl ExtractOptions {
    #[must_use]
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            selectors: FileSelector::from_config(config),
            domain_patterns: config.domain_patterns.clone(),
            output_dir: config.output_dir.clone(),
            force: false,
        }
    }
}

/// What a backup holds for the application.
#[derive(Debug, Clone)]
pub struct BackupAnalysis {
    pub backup: PathBuf,
    pub manifest_entries: usize,
    pub has_app_data: bool,
    pub stats: DomainStats,
    pub resolution: Resolution,
}

/// Outcome of an extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub output_dir: PathBuf,
    /// Copied or reused files.
    pub copied: Vec<CopyOutcome>,
    /// Optional files whose copy failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Optional files absent from the backup.
    pub missing: Vec<FileKind>,
}

impl ExtractionReport {
    #[must_use]
    pub fn reused_count(&self) -> usize {
        self.copied.iter().filter(|c| c.reused).count()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.copied.iter().map(|c| c.size_bytes).sum()
    }
}

fn load_index(backup: &Path) -> Result<ManifestIndex> {
    validate_backup(backup)?;
    ManifestIndex::load(backup)
}

/// Inspects a backup without copying anything.
///
/// Missing databases, the main one included, are listed in the report.
///
/// # Errors
/// Returns error if the backup or manifest is unusable.
pub fn analyze_backup(backup: &Path, domain_patterns: &[String]) -> Result<BackupAnalysis> {
    let index = load_index(backup)?;
    let has_app_data = index.has_domain(domain_patterns);
    if !has_app_data {
        tracing::warn!(
            backup = %backup.display(),
            patterns = ?domain_patterns,
            "No matching application domain in backup"
        );
    }

    let resolution = locate(
        &index,
        domain_patterns,
        &[
            FileSelector::Main,
            FileSelector::Contacts,
            FileSelector::OperationLog,
            FileSelector::Messages,
        ],
    )?;

    Ok(BackupAnalysis {
        backup: backup.to_path_buf(),
        manifest_entries: index.len(),
        has_app_data,
        stats: index.domain_stats(domain_patterns),
        resolution,
    })
}

/// Copies the selected databases out of a backup.
///
/// # Errors
/// Returns error if the backup is unusable, the main database is missing, or
/// copying it fails. Optional copy failures are recorded in the report.
pub fn extract_backup(backup: &Path, options: &ExtractOptions) -> Result<ExtractionReport> {
    let index = load_index(backup)?;
    let resolution = resolve(&index, &options.domain_patterns, &options.selectors)?;

    tracing::info!(
        backup = %backup.display(),
        output = %options.output_dir.display(),
        files = resolution.files.len(),
        "Extracting WeChat databases"
    );

    let mut report = ExtractionReport {
        output_dir: options.output_dir.clone(),
        missing: resolution.missing.clone(),
        ..ExtractionReport::default()
    };

    for file in &resolution.files {
        match copy_atomic(
            &file.physical_path,
            &options.output_dir,
            &file.logical_name,
            &file.physical_id,
            options.force,
        ) {
            Ok(outcome) => report.copied.push(outcome),
            Err(e) if file.kind.is_required() => return Err(e),
            Err(e) => {
                tracing::warn!(file = %file.logical_name, "Copy failed: {}", e);
                report.failed.push((file.logical_name.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        copied = report.copied.len(),
        reused = report.reused_count(),
        failed = report.failed.len(),
        "Extraction finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AppError;
    use crate::infrastructure::{file_id, verify_extraction, MANIFEST_DB};
    use rusqlite::Connection;
    use tempfile::tempdir;

    const DOMAIN: &str = "AppDomain-com.tencent.xin";

    fn build_backup(root: &Path, files: &[(&str, &[u8])]) {
        build_backup_in(root, DOMAIN, files);
    }

    fn build_backup_in(root: &Path, domain: &str, files: &[(&str, &[u8])]) {
        let conn = Connection::open(root.join(MANIFEST_DB)).unwrap();
        conn.execute_batch(
            "CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT,
                                 flags INTEGER, file BLOB);",
        )
        .unwrap();
        for (path, bytes) in files {
            let id = file_id(domain, path);
            conn.execute(
                "INSERT INTO Files VALUES (?1, ?2, ?3, 1, NULL)",
                rusqlite::params![id, domain, path],
            )
            .unwrap();
            let dir = root.join(&id[..2]);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(&id), bytes).unwrap();
        }
    }

    fn options(out: &Path) -> ExtractOptions {
        ExtractOptions {
            output_dir: out.to_path_buf(),
            ..ExtractOptions::from_config(&ExtractConfig::default())
        }
    }

    #[test]
    fn test_extract_and_reuse() {
        let backup = tempdir().unwrap();
        let out = tempdir().unwrap();
        build_backup(
            backup.path(),
            &[
                ("Documents/u/DB/MM.sqlite", b"main"),
                ("Documents/u/DB/message_1.sqlite", b"shard one"),
                ("Documents/u/Img/pic.jpg", b"jpg"),
            ],
        );

        let report = extract_backup(backup.path(), &options(out.path())).unwrap();
        assert_eq!(report.copied.len(), 2);
        assert_eq!(report.reused_count(), 0);
        assert_eq!(
            report.missing,
            vec![FileKind::ContactDatabase, FileKind::OperationLog]
        );
        assert_eq!(std::fs::read(out.path().join("MM.sqlite")).unwrap(), b"main");

        let again = extract_backup(backup.path(), &options(out.path())).unwrap();
        assert_eq!(again.reused_count(), 2);

        let forced = extract_backup(
            backup.path(),
            &ExtractOptions {
                force: true,
                ..options(out.path())
            },
        )
        .unwrap();
        assert_eq!(forced.reused_count(), 0);

        assert!(verify_extraction(out.path()).unwrap().is_clean());
    }

    #[test]
    fn test_truncated_copy_is_not_reused() {
        let backup = tempdir().unwrap();
        let out = tempdir().unwrap();
        build_backup(backup.path(), &[("Documents/u/DB/MM.sqlite", b"complete main db")]);

        extract_backup(backup.path(), &options(out.path())).unwrap();
        std::fs::write(out.path().join("MM.sqlite"), b"complete").unwrap();

        let report = extract_backup(backup.path(), &options(out.path())).unwrap();
        assert_eq!(report.reused_count(), 0);
        assert_eq!(
            std::fs::read(out.path().join("MM.sqlite")).unwrap(),
            b"complete main db"
        );
    }

    #[test]
    fn test_backup_without_main_database() {
        let backup = tempdir().unwrap();
        let out = tempdir().unwrap();
        build_backup(backup.path(), &[("Documents/u/DB/message_1.sqlite", b"x")]);

        let err = extract_backup(backup.path(), &options(out.path())).unwrap_err();
        assert!(matches!(err, AppError::MissingRequiredFile { .. }));

        let analysis = analyze_backup(backup.path(), &["com.tencent.xin".into()]).unwrap();
        assert!(analysis.has_app_data);
        assert_eq!(analysis.resolution.files.len(), 1);
        assert!(analysis.resolution.missing.contains(&FileKind::MainDatabase));
    }

    #[test]
    fn test_analyze_backup_without_wechat_data() {
        let backup = tempdir().unwrap();
        build_backup_in(
            backup.path(),
            "HomeDomain",
            &[("Library/SMS/sms.db", b"sms")],
        );

        let analysis = analyze_backup(backup.path(), &["com.tencent.xin".into()]).unwrap();
        assert!(!analysis.has_app_data);
        assert_eq!(analysis.manifest_entries, 1);
        assert_eq!(analysis.stats.total_files, 0);
        assert!(analysis.resolution.files.is_empty());
        assert!(analysis.resolution.missing.contains(&FileKind::MainDatabase));
    }

    #[test]
    fn test_analyze_backup() {
        let backup = tempdir().unwrap();
        build_backup(
            backup.path(),
            &[
                ("Documents/u/DB/MM.sqlite", b"main"),
                ("Documents/u/DB/WCDB_Contact.sqlite", b"contacts"),
                ("Documents/u/Audio/a.amr", b"amr"),
            ],
        );

        let analysis = analyze_backup(backup.path(), &["com.tencent.xin".into()]).unwrap();
        assert!(analysis.has_app_data);
        assert_eq!(analysis.manifest_entries, 3);
        assert_eq!(analysis.stats.audio, 1);
        assert_eq!(analysis.resolution.files.len(), 2);
        assert_eq!(analysis.resolution.total_bytes(), 12);
    }

    #[test]
    fn test_missing_backup_directory() {
        let err = analyze_backup(Path::new("/no/such/backup"), &[]).unwrap_err();
        assert!(matches!(err, AppError::BackupNotFound { .. }));
    }
}
