//! Application layer - use cases and orchestration.
//!
//! Backup resolution and extraction, contact lookup, multi-shard merge,
//! filtering and export.

pub mod contacts;
pub mod export;
pub mod extractor;
pub mod filter;
pub mod formatter;
pub mod merger;
pub mod parser;
pub mod resolver;
pub mod session;

pub use contacts::{ContactIndex, RemarkOverlay};
pub use export::{
    export_records, export_to_file, message_stats, preview, ExportFormat, ExportOptions,
    ExportRow, PreviewMode, RecordSource,
};
pub use extractor::{analyze_backup, extract_backup, BackupAnalysis, ExtractOptions, ExtractionReport};
pub use filter::{MessageFilter, TimeRange};
pub use formatter::{
    format_analysis, format_backups_table, format_bytes, format_contacts_table,
    format_extraction_report, format_message_stats, format_orphans_table, format_verification,
};
pub use merger::{merge, MergeOptions, MergePlan, MergedMessages};
pub use resolver::{locate, resolve, FileSelector, Resolution};
pub use session::{ChatQuery, ChatSession};
