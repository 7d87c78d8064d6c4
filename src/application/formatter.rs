//! Terminal formatting for CLI output.
//!
//! Tables via `comfy-table`, summaries decorated with `colored`.

use chrono::{DateTime, Local};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::{Contact, MessageStats, OrphanChat};
use crate::infrastructure::{BackupInfo, VerificationReport};

use super::extractor::{BackupAnalysis, ExtractionReport};

/// Formats discovered backups as a table.
#[must_use]
pub fn format_backups_table(backups: &[BackupInfo]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Backup ID", "Modified", "Info.plist"]);

    for (i, backup) in backups.iter().enumerate() {
        let modified = backup.last_modified.map_or_else(
            || "-".to_string(),
            |dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        );
        table.add_row(vec![
            (i + 1).to_string(),
            backup.id.clone(),
            modified,
            if backup.has_info_plist { "yes" } else { "no" }.to_string(),
        ]);
    }

    table.to_string()
}

/// Formats contacts as a table.
#[must_use]
pub fn format_contacts_table(contacts: &[Contact]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Identifier", "Name", "Remark"]);

    for contact in contacts {
        table.add_row(vec![
            contact.identifier.as_str(),
            truncate(&contact.raw_name, 30).as_str(),
            contact.remark.as_deref().unwrap_or("-"),
        ]);
    }

    table.to_string()
}

/// Formats chat tables without a contact.
#[must_use]
pub fn format_orphans_table(orphans: &[OrphanChat]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Chat table", "Messages"]);
    for orphan in orphans {
        table.add_row(vec![
            format!("Chat_{}", orphan.table_hash),
            orphan.message_count.to_string(),
        ]);
    }
    table.to_string()
}

/// Formats a backup analysis for display.
#[must_use]
pub fn format_analysis(analysis: &BackupAnalysis) -> String {
    let mut out = format!(
        "{}\n  Backup: {}\n  Manifest entries: {}\n  WeChat data: {}\n",
        "📱 Backup analysis".bold(),
        analysis.backup.display(),
        analysis.manifest_entries.to_string().cyan(),
        if analysis.has_app_data {
            "found".green()
        } else {
            "not found".red()
        },
    );
    let stats = &analysis.stats;
    out.push_str(&format!(
        "  Files: {} (databases {}, images {}, audio {}, videos {})\n",
        stats.total_files.to_string().cyan(),
        stats.databases,
        stats.images,
        stats.audio,
        stats.videos,
    ));

    out.push_str(&format!("\n{}\n", "🗄  Databases".bold()));
    for file in &analysis.resolution.files {
        out.push_str(&format!(
            "  {} {} ({})\n",
            "✓".green(),
            file.logical_name,
            format_bytes(file.size_bytes)
        ));
    }
    for kind in &analysis.resolution.missing {
        out.push_str(&format!("  {} {} missing\n", "✗".yellow(), kind.logical_name()));
    }
    out
}

/// Formats an extraction report for display.
#[must_use]
pub fn format_extraction_report(report: &ExtractionReport) -> String {
    let mut out = format!(
        "{}\n  Output: {}\n",
        "📦 Extraction".bold(),
        report.output_dir.display()
    );
    for copy in &report.copied {
        let status = if copy.reused {
            "reused".yellow()
        } else {
            "copied".green()
        };
        out.push_str(&format!(
            "  {status} {} ({})\n",
            copy.logical_name,
            format_bytes(copy.size_bytes)
        ));
    }
    for (name, reason) in &report.failed {
        out.push_str(&format!("  {} {name}: {reason}\n", "failed".red()));
    }
    for kind in &report.missing {
        out.push_str(&format!("  {} {}\n", "missing".dimmed(), kind.logical_name()));
    }
    out.push_str(&format!(
        "  Total: {} files, {}",
        report.copied.len().to_string().cyan(),
        format_bytes(report.total_bytes())
    ));
    out
}

/// Formats the result of verifying an extraction directory.
#[must_use]
pub fn format_verification(report: &VerificationReport) -> String {
    let mut out = String::new();
    for name in &report.valid {
        out.push_str(&format!("  {} {name}\n", "✓".green()));
    }
    for name in &report.invalid {
        out.push_str(&format!("  {} {name} (size or hash mismatch)\n", "✗".red()));
    }
    for name in &report.missing {
        out.push_str(&format!("  {} {name} (data file missing)\n", "✗".red()));
    }
    let verdict = if report.is_clean() {
        "All extracted files verified".green()
    } else {
        "Re-run extract to repair".yellow()
    };
    out.push_str(&verdict.to_string());
    out
}

/// Formats message statistics for display.
#[must_use]
pub fn format_message_stats(stats: &MessageStats) -> String {
    let when = |ts: Option<i64>| {
        ts.and_then(|t| DateTime::from_timestamp(t, 0))
            .map_or_else(
                || "-".to_string(),
                |dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            )
    };
    format!(
        "{}\n  Messages: {}\n  Sent: {}\n  Received: {}\n  First: {}\n  Last: {}",
        "📊 Statistics".bold(),
        stats.total.to_string().cyan(),
        stats.sent.to_string().green(),
        stats.received.to_string().blue(),
        when(stats.first),
        when(stats.last),
    )
}

/// Human-readable byte size.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Truncates to `max_chars` characters with an ellipsis.
fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
