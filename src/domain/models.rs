//! Domain models for WeChat backup data.
//!
//! These models represent the entities resolved from an iOS backup manifest
//! and read from the extracted WeChat `SQLite` databases.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One row of the backup manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    /// Backup domain, e.g. `AppDomain-com.tencent.xin`.
    pub domain: String,
    /// Path relative to the domain root, always `/`-separated.
    pub relative_path: String,
    /// Name of the file in the hashed store.
    pub physical_id: String,
    /// Manifest flags (1 = file, 2 = directory, 4 = symlink).
    pub flags: i64,
}

impl ManifestEntry {
    /// Whether this entry describes a regular file.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        self.flags == 1
    }

    /// Final path component of the relative path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Logical kind of a WeChat database inside a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FileKind {
    /// `MM.sqlite`, the account's main database.
    MainDatabase,
    /// `WCDB_Contact.sqlite`.
    ContactDatabase,
    /// `WCDB_OpLog.sqlite`.
    OperationLog,
    /// `message_N.sqlite`.
    MessageShard(u32),
}

impl FileKind {
    /// Output name of the extracted file.
    #[must_use]
    pub fn logical_name(self) -> String {
        match self {
            Self::MainDatabase => "MM.sqlite".to_string(),
            Self::ContactDatabase => "WCDB_Contact.sqlite".to_string(),
            Self::OperationLog => "WCDB_OpLog.sqlite".to_string(),
            Self::MessageShard(n) => format!("message_{n}.sqlite"),
        }
    }

    /// Only the main database is required for a usable extraction.
    #[must_use]
    pub const fn is_required(self) -> bool {
        matches!(self, Self::MainDatabase)
    }

    /// Maps a file name back to its kind.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "MM.sqlite" => Some(Self::MainDatabase),
            "WCDB_Contact.sqlite" => Some(Self::ContactDatabase),
            "WCDB_OpLog.sqlite" => Some(Self::OperationLog),
            _ => name
                .strip_prefix("message_")?
                .strip_suffix(".sqlite")?
                .parse()
                .ok()
                .map(Self::MessageShard),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainDatabase => write!(f, "main database"),
            Self::ContactDatabase => write!(f, "contact database"),
            Self::OperationLog => write!(f, "operation log"),
            Self::MessageShard(n) => write!(f, "message shard {n}"),
        }
    }
}

/// A backup file located in the hashed store and ready to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFile {
    /// What the file is.
    pub kind: FileKind,
    /// Name the copy will get in the output directory.
    pub logical_name: String,
    /// Location inside the backup's hashed store.
    pub physical_path: PathBuf,
    /// Identifier in the hashed store (the file name).
    pub physical_id: String,
    /// Size on disk.
    pub size_bytes: u64,
}

/// A contact from `WCDB_Contact.sqlite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    /// WeChat user name (`wxid_...`, `...@chatroom`), unique.
    pub identifier: String,
    /// Nickname as stored by WeChat.
    pub raw_name: String,
    /// User-assigned remark, if any.
    pub remark: Option<String>,
}

impl Contact {
    /// Name shown in exports: remark, then nickname, then identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.remark
            .as_deref()
            .filter(|r| !r.is_empty())
            .or_else(|| Some(self.raw_name.as_str()).filter(|n| !n.is_empty()))
            .unwrap_or(&self.identifier)
    }

    /// Whether the identifier names a group chat.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.identifier.ends_with("@chatroom")
    }
}

/// Who sent a message relative to the backup owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Direction {
    /// Sent by the device owner.
    Sent = 0,
    /// Received from the contact (or a group member).
    Received = 1,
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> Self {
        d as Self
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sent),
            1 => Ok(Self::Received),
            other => Err(format!("invalid direction: {other}")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Received => write!(f, "Received"),
        }
    }
}

/// Message payload category, from the `Type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Voice,
    Other,
}

impl ContentType {
    /// Maps WeChat's numeric message type.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            34 => Self::Voice,
            _ => Self::Other,
        }
    }
}

/// Where a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordOrigin {
    /// Shard number (`message_N.sqlite`).
    pub shard: u32,
    /// `MesLocalID` within that shard's chat table.
    pub row_id: i64,
}

/// A single normalized chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    /// Epoch seconds.
    pub timestamp: i64,
    pub direction: Direction,
    /// Group member who sent a received group message.
    pub sender_id: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    pub origin: RecordOrigin,
}

/// Non-fatal problem recorded while reading shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardWarning {
    /// File the problem relates to.
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for ShardWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Chat table with no matching contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanChat {
    /// Hex digest part of the `Chat_<hash>` table name.
    pub table_hash: String,
    /// Rows across all shards.
    pub message_count: usize,
}

/// Summary over a merged, filtered message sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub total: usize,
    pub sent: usize,
    pub received: usize,
    /// Earliest timestamp seen.
    pub first: Option<i64>,
    /// Latest timestamp seen.
    pub last: Option<i64>,
}

impl MessageStats {
    /// Folds one record into the summary.
    pub fn record(&mut self, message: &MessageRecord) {
        self.total += 1;
        match message.direction {
            Direction::Sent => self.sent += 1,
            Direction::Received => self.received += 1,
        }
        self.first = Some(self.first.map_or(message.timestamp, |f| f.min(message.timestamp)));
        self.last = Some(self.last.map_or(message.timestamp, |l| l.max(message.timestamp)));
    }
}
