//! Domain-level error types for wechat-backup-handler.
//!
//! All errors are typed with `thiserror`. Shard-level and optional lookup
//! failures are recovered by callers; the rest end the current session.

use std::path::PathBuf;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Backup directory or its manifest is missing.
    #[error("iOS backup not found at: {path}")]
    BackupNotFound { path: PathBuf },

    /// The backup manifest exists but cannot be parsed.
    #[error("Corrupt manifest {path}: {message}")]
    CorruptManifest { path: PathBuf, message: String },

    /// A single (domain, relative path) lookup had no entry.
    #[error("No manifest entry for {domain}-{relative_path}")]
    NotFound {
        domain: String,
        relative_path: String,
    },

    /// A file the session cannot proceed without is absent.
    #[error("Required file missing: {logical_name}")]
    MissingRequiredFile { logical_name: String },

    /// A database could not be opened or probed (corrupt, encrypted, locked).
    #[error("Unreadable database {path}: {message}")]
    UnreadableDatabase {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// The requested contact is not in the contact index.
    #[error("Unknown contact: {identifier}")]
    UnknownContact { identifier: String },

    /// Writing an export failed; the destination may hold partial output.
    #[error("Export failed: {message}")]
    ExportWriteFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to query an already opened database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid or unexpected data (bad identifiers, malformed input).
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create an unreadable-database error for the given file.
    pub fn unreadable(path: impl Into<PathBuf>, err: rusqlite::Error) -> Self {
        Self::UnreadableDatabase {
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }

    /// Create an export failure from any underlying error.
    pub fn export(
        message: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ExportWriteFailure {
            message: message.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Whether the failure only affects one optional shard or lookup.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnreadableDatabase { .. } | Self::NotFound { .. })
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
