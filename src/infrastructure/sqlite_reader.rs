//! Read-only `SQLite` access for extracted WeChat databases.
//!
//! Exposes a narrow row-scan capability over named tables so the rest of the
//! crate never builds SQL itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, ToSql};

use crate::domain::{AppError, Result, ShardWarning};

/// Message shard file name pattern: `message_<N>.sqlite`.
const SHARD_PREFIX: &str = "message_";
const SHARD_SUFFIX: &str = ".sqlite";

/// How long to wait on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Engine-neutral cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Integer view, accepting numeric text.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Real(f) => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null | Self::Blob(_) => None,
        }
    }

    /// Text view; blobs are decoded lossily.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(f) => Some(f.to_string()),
            Self::Null => None,
        }
    }

    /// Raw bytes for text or blob cells.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

/// One scanned row, cells in the requested column order.
pub type ScanRow = Vec<CellValue>;

/// Parameterized scan over a single table.
///
/// With `order_key` set, rows come back ordered by the two integer columns
/// and `after` acts as an exclusive keyset bound, which lets callers page
/// through a table without holding a statement open.
#[derive(Debug, Clone)]
pub struct TableScan<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    pub order_key: Option<(&'a str, &'a str)>,
    pub after: Option<(i64, i64)>,
    pub limit: Option<usize>,
}

impl<'a> TableScan<'a> {
    /// Full scan of `columns` in storage order.
    #[must_use]
    pub const fn new(table: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            table,
            columns,
            order_key: None,
            after: None,
            limit: None,
        }
    }

    #[must_use]
    pub const fn ordered_by(mut self, primary: &'a str, secondary: &'a str) -> Self {
        self.order_key = Some((primary, secondary));
        self
    }

    #[must_use]
    pub const fn after(mut self, key: Option<(i64, i64)>) -> Self {
        self.after = key;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> Result<String> {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let mut sql = format!("SELECT {columns} FROM {}", quote_ident(self.table)?);

        if let Some((primary, secondary)) = self.order_key {
            let (primary, secondary) = (quote_ident(primary)?, quote_ident(secondary)?);
            if self.after.is_some() {
                sql.push_str(&format!(" WHERE ({primary}, {secondary}) > (?1, ?2)"));
            }
            sql.push_str(&format!(" ORDER BY {primary}, {secondary}"));
        }
        if self.limit.is_some() {
            sql.push_str(if self.after.is_some() && self.order_key.is_some() {
                " LIMIT ?3"
            } else {
                " LIMIT ?1"
            });
        }
        Ok(sql)
    }
}

/// Validates and double-quotes an SQL identifier.
fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::InvalidData {
            message: format!("Invalid table or column name: {name:?}"),
        });
    }
    Ok(format!("\"{name}\""))
}

/// Read-only handle on one extracted database file.
pub struct ShardHandle {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle").field("path", &self.path).finish()
    }
}

impl ShardHandle {
    /// Opens a database in read-only mode and probes that it is readable.
    ///
    /// # Errors
    /// Returns `UnreadableDatabase` if the file is missing, encrypted,
    /// corrupt or locked.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| AppError::unreadable(path, e))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| AppError::unreadable(path, e))?;

        // Optimize for read-only access
        conn.execute_batch(
            "PRAGMA query_only = ON;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| AppError::unreadable(path, e))?;

        // Encrypted or non-SQLite files only fail once a page is read.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| AppError::unreadable(path, e))?;

        tracing::debug!(path = %path.display(), "Opened database read-only");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// File this handle reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of tables starting with `prefix`, sorted.
    ///
    /// # Errors
    /// Returns error if the schema cannot be read.
    pub fn table_names(&self, prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND substr(name, 1, length(?1)) = ?1
                 ORDER BY name",
            )
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([prefix], |row| row.get::<_, String>(0))
            .map_err(AppError::database)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(AppError::database)
    }

    /// Whether a table with exactly this name exists.
    ///
    /// # Errors
    /// Returns error if the schema cannot be read.
    pub fn has_table(&self, name: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(AppError::database)
    }

    /// Number of rows in a table.
    ///
    /// # Errors
    /// Returns error if the table name is invalid or the query fails.
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT count(*) FROM {}", quote_ident(table)?);
        self.conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|c| usize::try_from(c).unwrap_or(0))
            .map_err(AppError::database)
    }

    /// Runs a table scan.
    ///
    /// Rows that fail to decode are skipped with a warning.
    ///
    /// # Errors
    /// Returns error if identifiers are invalid or the query fails.
    pub fn scan(&self, scan: &TableScan<'_>) -> Result<Vec<ScanRow>> {
        let sql = scan.to_sql()?;
        let mut stmt = self.conn.prepare(&sql).map_err(AppError::database)?;

        let limit = scan
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(3);
        let after = scan.after.filter(|_| scan.order_key.is_some());
        if let Some((a, b)) = after.as_ref() {
            params.push(a);
            params.push(b);
        }
        if let Some(l) = limit.as_ref() {
            params.push(l);
        }

        let width = scan.columns.len();
        let rows = stmt
            .query_map(params.as_slice(), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(CellValue::from))
                    .collect::<rusqlite::Result<ScanRow>>()
            })
            .map_err(AppError::database)?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(table = scan.table, "Failed to read row: {}", e);
                }
            }
        }

        tracing::trace!(table = scan.table, rows = out.len(), "Scanned table");

        Ok(out)
    }
}

/// An opened message shard.
#[derive(Debug)]
pub struct LoadedShard {
    /// `N` of `message_N.sqlite`.
    pub number: u32,
    pub handle: ShardHandle,
}

/// Finds `message_*.sqlite` files in a directory, sorted by shard number.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn find_message_shards(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("Failed to read {}", dir.display()), e))?;

    let mut shards: Vec<(u32, PathBuf)> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let number = name
                .to_str()?
                .strip_prefix(SHARD_PREFIX)?
                .strip_suffix(SHARD_SUFFIX)?
                .parse()
                .ok()?;
            Some((number, entry.path()))
        })
        .collect();

    shards.sort_by_key(|(n, _)| *n);
    Ok(shards)
}

/// Opens every message shard in `dir`, skipping unreadable ones.
///
/// # Errors
/// Returns error only if the directory itself cannot be listed.
pub fn open_shards(dir: &Path) -> Result<(Vec<LoadedShard>, Vec<ShardWarning>)> {
    let mut shards = Vec::new();
    let mut warnings = Vec::new();

    for (number, path) in find_message_shards(dir)? {
        match ShardHandle::open_read_only(&path) {
            Ok(handle) => shards.push(LoadedShard { number, handle }),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(path = %path.display(), "Skipping message shard: {}", e);
                warnings.push(ShardWarning {
                    path,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(
        opened = shards.len(),
        skipped = warnings.len(),
        "Opened message shards"
    );

    Ok((shards, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Chat_a (CreateTime INTEGER, MesLocalID INTEGER, Message TEXT);
             CREATE TABLE Chat_b (CreateTime INTEGER, MesLocalID INTEGER, Message TEXT);
             CREATE TABLE Other (x INTEGER);
             INSERT INTO Chat_a VALUES (30, 1, 'c'), (10, 2, 'a'), (10, 3, 'b'), (20, 4, X'6869');",
        )
        .unwrap();
    }

    #[test]
    fn test_open_rejects_non_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("message_1.sqlite");
        std::fs::write(&path, vec![0xA5_u8; 4096]).unwrap();

        let err = ShardHandle::open_read_only(&path).unwrap_err();
        assert!(matches!(err, AppError::UnreadableDatabase { .. }));
    }

    #[test]
    fn test_table_names_by_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        make_db(&path);

        let handle = ShardHandle::open_read_only(&path).unwrap();
        assert_eq!(handle.table_names("Chat_").unwrap(), vec!["Chat_a", "Chat_b"]);
        assert!(handle.has_table("Other").unwrap());
        assert!(!handle.has_table("Chat_c").unwrap());
        assert_eq!(handle.count_rows("Chat_a").unwrap(), 4);
    }

    #[test]
    fn test_keyset_paging() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        make_db(&path);
        let handle = ShardHandle::open_read_only(&path).unwrap();

        let columns = ["CreateTime", "MesLocalID", "Message"];
        let first = handle
            .scan(
                &TableScan::new("Chat_a", &columns)
                    .ordered_by("CreateTime", "MesLocalID")
                    .limit(2),
            )
            .unwrap();
        let texts: Vec<_> = first.iter().map(|r| r[2].to_text().unwrap()).collect();
        assert_eq!(texts, vec!["a", "b"]);

        let rest = handle
            .scan(
                &TableScan::new("Chat_a", &columns)
                    .ordered_by("CreateTime", "MesLocalID")
                    .after(Some((10, 3)))
                    .limit(10),
            )
            .unwrap();
        let texts: Vec<_> = rest.iter().map(|r| r[2].to_text().unwrap()).collect();
        assert_eq!(texts, vec!["hi", "c"]);
    }

    #[test]
    fn test_scan_rejects_bad_identifiers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        make_db(&path);
        let handle = ShardHandle::open_read_only(&path).unwrap();

        let columns = ["x"];
        let scan = TableScan::new("Other; DROP TABLE Other", &columns);
        assert!(handle.scan(&scan).is_err());
    }

    #[test]
    fn test_open_shards_skips_unreadable() {
        let dir = tempdir().unwrap();
        make_db(&dir.path().join("message_2.sqlite"));
        make_db(&dir.path().join("message_10.sqlite"));
        std::fs::write(dir.path().join("message_3.sqlite"), vec![0xA5_u8; 4096]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let (shards, warnings) = open_shards(dir.path()).unwrap();
        let numbers: Vec<_> = shards.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![2, 10]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].path.ends_with("message_3.sqlite"));
    }
}
