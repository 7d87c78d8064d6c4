//! Infrastructure layer - external adapters (database, filesystem).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod backup_paths;
pub mod config;
pub mod file_copier;
pub mod manifest;
pub mod sqlite_reader;

pub use backup_paths::{discover_backups, find_backup_root, validate_backup, BackupInfo};
pub use config::{config_file_path, ensure_config_exists, load_config, load_config_from_file};
pub use file_copier::{
    completed_copy, copy_atomic, verify_extraction, CompletionMarker, CopyOutcome,
    VerificationReport,
};
pub use manifest::{file_id, physical_path, DomainStats, ManifestIndex, MANIFEST_DB};
pub use sqlite_reader::{
    find_message_shards, open_shards, CellValue, LoadedShard, ScanRow, ShardHandle, TableScan,
};
