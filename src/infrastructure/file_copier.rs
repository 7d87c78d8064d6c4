//! Atomic extraction of backup files.
//!
//! A copy is streamed into a hidden `.partial` file while hashing, renamed
//! into place, and only then confirmed by a `<name>.complete.json` marker.
//! A data file without a valid marker is never treated as extracted.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::domain::{AppError, Result};

const MARKER_SUFFIX: &str = ".complete.json";
const COPY_BUFFER: usize = 64 * 1024;

/// Completion record written next to every extracted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub logical_name: String,
    /// Hashed-store identifier the file was copied from.
    pub source_id: String,
    pub size_bytes: u64,
    pub sha1: String,
    pub extracted_at: DateTime<Utc>,
}

/// Result of copying a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub logical_name: String,
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub sha1: String,
    /// The destination was already complete and was left untouched.
    pub reused: bool,
}

/// State of an extraction directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub valid: Vec<String>,
    /// Size or hash differs from the marker.
    pub invalid: Vec<String>,
    /// Marker present but data file gone.
    pub missing: Vec<String>,
}

impl VerificationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty() && self.missing.is_empty()
    }
}

fn marker_path(dest_dir: &Path, logical_name: &str) -> PathBuf {
    dest_dir.join(format!("{logical_name}{MARKER_SUFFIX}"))
}

/// SHA-1 and length of a file's contents.
///
/// # Errors
/// Returns error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open {}", path.display()), e))?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER, file);
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Reads the completion marker for `logical_name`, if any.
///
/// # Errors
/// Returns error if the marker exists but cannot be read or parsed.
pub fn read_marker(dest_dir: &Path, logical_name: &str) -> Result<Option<CompletionMarker>> {
    let path = marker_path(dest_dir, logical_name);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read(&path)
        .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))?;
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(AppError::json_parse)
}

/// Checks whether `logical_name` in `dest_dir` is a verified, complete copy.
///
/// The marker must exist, and the data file's size and SHA-1 must match it.
///
/// # Errors
/// Returns error only on unexpected I/O failures.
pub fn completed_copy(dest_dir: &Path, logical_name: &str) -> Result<Option<CompletionMarker>> {
    let Some(marker) = read_marker(dest_dir, logical_name).ok().flatten() else {
        return Ok(None);
    };
    let data = dest_dir.join(logical_name);
    let Ok(meta) = fs::metadata(&data) else {
        return Ok(None);
    };
    if meta.len() != marker.size_bytes {
        return Ok(None);
    }
    let (sha1, _) = hash_file(&data)?;
    Ok((sha1 == marker.sha1).then_some(marker))
}

/// Copies `source` to `dest_dir/logical_name` with atomic-or-nothing semantics.
///
/// An existing verified copy of the same `source_id` is reused unless `force`.
///
/// # Errors
/// Returns error if reading, writing, or renaming fails; in that case no
/// completion marker exists for the destination.
pub fn copy_atomic(
    source: &Path,
    dest_dir: &Path,
    logical_name: &str,
    source_id: &str,
    force: bool,
) -> Result<CopyOutcome> {
    let destination = dest_dir.join(logical_name);

    if !force {
        if let Some(marker) = completed_copy(dest_dir, logical_name)? {
            let source_len = fs::metadata(source).map(|m| m.len()).ok();
            if marker.source_id == source_id && source_len == Some(marker.size_bytes) {
                tracing::debug!(file = logical_name, "Reusing verified extraction");
                return Ok(CopyOutcome {
                    logical_name: logical_name.to_string(),
                    destination,
                    size_bytes: marker.size_bytes,
                    sha1: marker.sha1,
                    reused: true,
                });
            }
        }
    }

    fs::create_dir_all(dest_dir)
        .map_err(|e| AppError::io("Failed to create output directory", e))?;

    let marker = marker_path(dest_dir, logical_name);
    if marker.exists() {
        fs::remove_file(&marker)
            .map_err(|e| AppError::io(format!("Failed to remove {}", marker.display()), e))?;
    }

    let partial = dest_dir.join(format!(".{logical_name}.partial"));
    let (sha1, size_bytes) = stream_copy(source, &partial).inspect_err(|_| {
        let _ = fs::remove_file(&partial);
    })?;

    fs::rename(&partial, &destination).map_err(|e| {
        let _ = fs::remove_file(&partial);
        AppError::io(format!("Failed to move {} into place", destination.display()), e)
    })?;

    let record = CompletionMarker {
        logical_name: logical_name.to_string(),
        source_id: source_id.to_string(),
        size_bytes,
        sha1: sha1.clone(),
        extracted_at: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&record).map_err(AppError::json_parse)?;
    atomic_write_bytes(&marker, &json)?;

    tracing::info!(
        file = logical_name,
        size_bytes,
        "Extracted file"
    );

    Ok(CopyOutcome {
        logical_name: logical_name.to_string(),
        destination,
        size_bytes,
        sha1,
        reused: false,
    })
}

/// Streams `source` into `target`, returning the SHA-1 and byte count.
fn stream_copy(source: &Path, target: &Path) -> Result<(String, u64)> {
    let input = File::open(source)
        .map_err(|e| AppError::io(format!("Failed to open {}", source.display()), e))?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER, input);
    let output = File::create(target)
        .map_err(|e| AppError::io(format!("Failed to create {}", target.display()), e))?;
    let mut writer = BufWriter::with_capacity(COPY_BUFFER, output);

    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| AppError::io(format!("Failed to read {}", source.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer
            .write_all(&buf[..n])
            .map_err(|e| AppError::io("Failed to write extracted file", e))?;
        total += n as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| AppError::io("Failed to flush extracted file", e.into_error()))?;
    file.sync_all()
        .map_err(|e| AppError::io("Failed to sync extracted file", e))?;

    Ok((hex::encode(hasher.finalize()), total))
}

/// Writes bytes via a temp file in the same directory plus rename.
fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = format!(
        ".tmp-{}-{}",
        std::process::id(),
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    let tmp_path = parent.join(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_data()?;
        fs::rename(&tmp_path, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        AppError::io(format!("Failed to write {}", path.display()), e)
    })
}

/// Checks every completion marker in `dest_dir`.
///
/// # Errors
/// Returns error if the directory cannot be listed.
pub fn verify_extraction(dest_dir: &Path) -> Result<VerificationReport> {
    let entries = fs::read_dir(dest_dir)
        .map_err(|e| AppError::io(format!("Failed to read {}", dest_dir.display()), e))?;

    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            e.file_name()
                .to_str()?
                .strip_suffix(MARKER_SUFFIX)
                .map(str::to_string)
        })
        .collect();
    names.sort();

    let mut report = VerificationReport::default();
    for name in names {
        if !dest_dir.join(&name).exists() {
            report.missing.push(name);
        } else if completed_copy(dest_dir, &name)?.is_some() {
            report.valid.push(name);
        } else {
            report.invalid.push(name);
        }
    }

    tracing::debug!(
        valid = report.valid.len(),
        invalid = report.invalid.len(),
        missing = report.missing.len(),
        "Verified extraction directory"
    );

    Ok(report)
}
