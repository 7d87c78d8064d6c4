//! Chat history export.
//!
//! Renders a merged message stream as a text transcript, JSON or CSV in one
//! linear scan.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{AppError, Contact, Direction, MessageRecord, MessageStats, Result};

/// Export format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Human-readable transcript grouped by date.
    #[default]
    Text,
    /// Array of message objects.
    Json,
    /// One row per message with a header row.
    Csv,
}

impl ExportFormat {
    /// Conventional file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Unknown format: {s}. Use: text, json, csv")),
        }
    }
}

/// Rendering settings shared by all formats.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Fixed offset for times; `None` renders in the local zone.
    pub utc_offset: Option<FixedOffset>,
    /// Speaker label for sent messages in text exports.
    pub self_label: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            utc_offset: None,
            self_label: "Me".to_string(),
        }
    }
}

impl ExportOptions {
    fn local_time(&self, timestamp: i64) -> Option<NaiveDateTime> {
        let utc = DateTime::from_timestamp(timestamp, 0)?;
        Some(match self.utc_offset {
            Some(tz) => utc.with_timezone(&tz).naive_local(),
            None => utc.with_timezone(&Local).naive_local(),
        })
    }

    fn datetime_string(&self, timestamp: i64) -> String {
        self.local_time(timestamp).map_or_else(
            || timestamp.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    }
}

/// One exported message in JSON and CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    /// `YYYY-MM-DD HH:MM:SS`.
    pub datetime: String,
    /// 0 = sent, 1 = received.
    pub direction: u8,
    pub message: String,
    pub contact_display_name: String,
}

impl ExportRow {
    #[must_use]
    pub fn new(record: &MessageRecord, contact: &Contact, options: &ExportOptions) -> Self {
        Self {
            datetime: options.datetime_string(record.timestamp),
            direction: record.direction.into(),
            message: record.content.clone(),
            contact_display_name: contact.display_name().to_string(),
        }
    }
}

const CSV_HEADER: [&str; 4] = ["datetime", "direction", "message", "contact_display_name"];

/// Writes `records` to `writer` in `format`.
///
/// Returns statistics gathered during the same scan.
///
/// # Errors
/// Returns `ExportWriteFailure` if writing or serialization fails. Output
/// written before the failure is left in place.
pub fn export_records<W, I>(
    writer: &mut W,
    records: I,
    contact: &Contact,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<MessageStats>
where
    W: Write,
    I: IntoIterator<Item = MessageRecord>,
{
    let stats = match format {
        ExportFormat::Text => write_text(writer, records, contact, options)?,
        ExportFormat::Json => write_json(writer, records, contact, options)?,
        ExportFormat::Csv => write_csv(writer, records, contact, options)?,
    };
    writer
        .flush()
        .map_err(|e| AppError::export("Failed to flush export", e))?;

    tracing::debug!(
        contact = %contact.identifier,
        format = ?format,
        messages = stats.total,
        "Exported messages"
    );

    Ok(stats)
}

/// Exports to a file, creating parent directories.
///
/// # Errors
/// Returns `ExportWriteFailure` if the file cannot be created or written.
pub fn export_to_file<I>(
    path: &Path,
    records: I,
    contact: &Contact,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<MessageStats>
where
    I: IntoIterator<Item = MessageRecord>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::export(format!("Failed to create {}", parent.display()), e)
        })?;
    }
    let file = File::create(path)
        .map_err(|e| AppError::export(format!("Failed to create {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);

    let stats = export_records(&mut writer, records, contact, format, options)?;

    tracing::info!(
        path = %path.display(),
        messages = stats.total,
        "Wrote export file"
    );

    Ok(stats)
}

fn write_err(e: std::io::Error) -> AppError {
    AppError::export("Failed to write export", e)
}

fn write_text<W: Write>(
    writer: &mut W,
    records: impl IntoIterator<Item = MessageRecord>,
    contact: &Contact,
    options: &ExportOptions,
) -> Result<MessageStats> {
    let rule = "=".repeat(50);
    writeln!(writer, "{rule}").map_err(write_err)?;
    writeln!(writer, "Contact: {} ({})", contact.display_name(), contact.identifier)
        .map_err(write_err)?;
    writeln!(writer, "{rule}").map_err(write_err)?;

    let mut stats = MessageStats::default();
    let mut current_date: Option<String> = None;

    for record in records {
        stats.record(&record);

        let local = options.local_time(record.timestamp);
        let date = local.map_or_else(|| "????-??-??".to_string(), |dt| dt.format("%Y-%m-%d").to_string());
        if current_date.as_deref() != Some(date.as_str()) {
            writeln!(writer, "\n📅 {date}").map_err(write_err)?;
            current_date = Some(date);
        }

        let time = local.map_or_else(|| "??:??:??".to_string(), |dt| dt.format("%H:%M:%S").to_string());
        let (marker, speaker) = match record.direction {
            Direction::Sent => ("📤", options.self_label.as_str()),
            Direction::Received => (
                "📥",
                record
                    .sender_id
                    .as_deref()
                    .unwrap_or_else(|| contact.display_name()),
            ),
        };
        writeln!(writer, "{marker} [{time}] {speaker}: {}", record.content).map_err(write_err)?;
    }

    Ok(stats)
}

fn write_json<W: Write>(
    writer: &mut W,
    records: impl IntoIterator<Item = MessageRecord>,
    contact: &Contact,
    options: &ExportOptions,
) -> Result<MessageStats> {
    let mut stats = MessageStats::default();

    writer.write_all(b"[").map_err(write_err)?;
    for record in records {
        let separator: &[u8] = if stats.total == 0 { b"\n" } else { b",\n" };
        writer.write_all(separator).map_err(write_err)?;
        stats.record(&record);
        let row = ExportRow::new(&record, contact, options);
        serde_json::to_writer_pretty(&mut *writer, &row)
            .map_err(|e| AppError::export("Failed to serialize message", e))?;
    }
    let closing: &[u8] = if stats.total == 0 { b"]\n" } else { b"\n]\n" };
    writer.write_all(closing).map_err(write_err)?;

    Ok(stats)
}

fn write_csv<W: Write>(
    writer: &mut W,
    records: impl IntoIterator<Item = MessageRecord>,
    contact: &Contact,
    options: &ExportOptions,
) -> Result<MessageStats> {
    let csv_err = |e: csv::Error| AppError::export("Failed to write CSV", e);

    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&mut *writer);
    csv.write_record(CSV_HEADER).map_err(csv_err)?;

    let mut stats = MessageStats::default();
    for record in records {
        stats.record(&record);
        csv.serialize(ExportRow::new(&record, contact, options))
            .map_err(csv_err)?;
    }
    csv.flush().map_err(write_err)?;

    Ok(stats)
}

/// Something that can produce a fresh record stream on demand.
pub trait RecordSource {
    /// Starts an independent scan.
    fn records(&self) -> Box<dyn Iterator<Item = MessageRecord> + '_>;
}

impl RecordSource for [MessageRecord] {
    fn records(&self) -> Box<dyn Iterator<Item = MessageRecord> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl RecordSource for Vec<MessageRecord> {
    fn records(&self) -> Box<dyn Iterator<Item = MessageRecord> + '_> {
        self.as_slice().records()
    }
}

impl RecordSource for super::merger::MergePlan<'_> {
    fn records(&self) -> Box<dyn Iterator<Item = MessageRecord> + '_> {
        Box::new(self.iter())
    }
}

/// Which end of the history a preview shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreviewMode {
    #[default]
    Earliest,
    Latest,
}

/// Up to `limit` records from one end of the stream, in timestamp order.
///
/// Runs its own scan, so the source stays available for a full export.
#[must_use]
pub fn preview<S>(source: &S, limit: usize, mode: PreviewMode) -> Vec<MessageRecord>
where
    S: RecordSource + ?Sized,
{
    match mode {
        PreviewMode::Earliest => source.records().take(limit).collect(),
        PreviewMode::Latest => {
            let mut window = VecDeque::with_capacity(limit);
            if limit > 0 {
                for record in source.records() {
                    if window.len() == limit {
                        window.pop_front();
                    }
                    window.push_back(record);
                }
            }
            window.into()
        }
    }
}

/// Counts messages in one scan of `records`.
pub fn message_stats(records: impl IntoIterator<Item = MessageRecord>) -> MessageStats {
    records.into_iter().fold(MessageStats::default(), |mut stats, record| {
        stats.record(&record);
        stats
    })
}
