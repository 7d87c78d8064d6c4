//! Domain layer - core types, configuration model and errors.
//!
//! This layer contains pure domain models and error types
//! without any external dependencies (DB, IO, etc.).

pub mod config;
pub mod error;
pub mod models;

pub use config::{AppConfig, DedupPolicy, ExportConfig, ExtractConfig, MergeConfig, PathConfig};
pub use error::{AppError, Result};
pub use models::{
    Contact, ContentType, Direction, FileKind, ManifestEntry, MessageRecord, MessageStats,
    OrphanChat, RecordOrigin, ResolvedFile, ShardWarning,
};
