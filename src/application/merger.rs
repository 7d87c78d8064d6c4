//! Multi-shard message merge.
//!
//! A contact's history is spread over `message_N.sqlite` shards. The merge
//! keeps one paged cursor per (shard, chat table) in an arena and pops the
//! globally smallest timestamp from a heap, so memory stays bounded by
//! `page_size` rows per cursor.
//!
//! Equal timestamps are ordered by cursor index, then by `MesLocalID`.
//! Content dedup only drops a record when another cursor already produced
//! the same (timestamp, direction, content); repeats within one chat table
//! are distinct rows and are kept.
//! Cursors are ordered by shard number, and within a shard the contact's own
//! chat table comes before group tables.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use crate::domain::{DedupPolicy, Direction, MergeConfig, MessageRecord, Result, ShardWarning};
use crate::infrastructure::{CellValue, LoadedShard, ShardHandle, TableScan};

use super::parser::{chat_table_name, parse_message_row, MESSAGE_COLUMNS, MESSAGE_ORDER_KEY};

/// Options for building a merge plan.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub dedup: DedupPolicy,
    /// Rows fetched per cursor refill.
    pub page_size: usize,
    /// Group chats whose messages sent by the contact are included.
    pub group_ids: Vec<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

impl MergeOptions {
    #[must_use]
    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            dedup: config.dedup,
            page_size: config.page_size,
            group_ids: Vec::new(),
        }
    }
}

/// One chat table in one shard feeding the merge.
#[derive(Debug)]
struct MergeSource<'a> {
    shard: u32,
    handle: &'a ShardHandle,
    table: String,
    /// Rows carry a `sender:\n` prefix.
    is_group: bool,
    /// Keep only group rows from this sender.
    sender: Option<String>,
}

impl MergeSource<'_> {
    fn admits(&self, record: &MessageRecord) -> bool {
        self.sender
            .as_deref()
            .is_none_or(|s| record.sender_id.as_deref() == Some(s))
    }
}

/// Deterministic, restartable merge definition for one contact.
#[derive(Debug)]
pub struct MergePlan<'a> {
    contact_id: String,
    sources: Vec<MergeSource<'a>>,
    dedup: DedupPolicy,
    page_size: usize,
    warnings: Vec<ShardWarning>,
    /// Cursors dropped mid-scan, shared by every `iter()`.
    scan_warnings: RefCell<Vec<ShardWarning>>,
}

/// Plans the merge of a contact's messages across shards.
///
/// Shards lacking the contact's chat table contribute nothing. Shards whose
/// schema cannot be read are skipped with a warning.
#[must_use]
pub fn merge<'a>(
    shards: &'a [LoadedShard],
    contact_id: &str,
    options: &MergeOptions,
) -> MergePlan<'a> {
    let contact_is_group = contact_id.ends_with("@chatroom");
    let mut tables = vec![(chat_table_name(contact_id), contact_is_group, None)];
    tables.extend(
        options
            .group_ids
            .iter()
            .filter(|g| g.as_str() != contact_id)
            .map(|g| (chat_table_name(g), true, Some(contact_id.to_string()))),
    );

    let mut ordered: Vec<&LoadedShard> = shards.iter().collect();
    ordered.sort_by_key(|s| s.number);

    let mut sources = Vec::new();
    let mut warnings = Vec::new();
    for shard in ordered {
        for (table, is_group, sender) in &tables {
            match shard.handle.has_table(table) {
                Ok(true) => sources.push(MergeSource {
                    shard: shard.number,
                    handle: &shard.handle,
                    table: table.clone(),
                    is_group: *is_group,
                    sender: sender.clone(),
                }),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(shard = shard.number, table = %table, "Skipping chat table: {}", e);
                    warnings.push(ShardWarning {
                        path: shard.handle.path().to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    tracing::debug!(
        contact = contact_id,
        sources = sources.len(),
        "Planned message merge"
    );

    MergePlan {
        contact_id: contact_id.to_string(),
        sources,
        dedup: options.dedup,
        page_size: options.page_size.max(1),
        warnings,
        scan_warnings: RefCell::new(Vec::new()),
    }
}

impl MergePlan<'_> {
    #[must_use]
    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    /// Number of (shard, table) cursors the merge will open.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Problems found while planning and by the scans run so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<ShardWarning> {
        let mut all = self.warnings.clone();
        all.extend(self.scan_warnings.borrow().iter().cloned());
        all
    }

    /// Starts an independent scan of the merged sequence.
    #[must_use]
    pub fn iter(&self) -> MergedMessages<'_> {
        let mut merged = MergedMessages {
            cursors: self.sources.iter().map(|s| ShardCursor::new(s)).collect(),
            heap: BinaryHeap::new(),
            window: DedupWindow::new(self.dedup),
            page_size: self.page_size,
            sink: &self.scan_warnings,
        };
        for idx in 0..merged.cursors.len() {
            merged.refill(idx);
        }
        merged
    }
}

/// Paged reader over one merge source.
struct ShardCursor<'s> {
    source: &'s MergeSource<'s>,
    buffer: VecDeque<MessageRecord>,
    last_key: Option<(i64, i64)>,
    exhausted: bool,
}

impl<'s> ShardCursor<'s> {
    const fn new(source: &'s MergeSource<'s>) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            last_key: None,
            exhausted: false,
        }
    }

    /// Fetches pages until a record is buffered or the table is exhausted.
    fn fill(&mut self, page_size: usize) -> Result<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let scan = TableScan::new(&self.source.table, MESSAGE_COLUMNS)
                .ordered_by(MESSAGE_ORDER_KEY.0, MESSAGE_ORDER_KEY.1)
                .after(self.last_key)
                .limit(page_size);
            let rows = self.source.handle.scan(&scan)?;

            let previous = self.last_key;
            self.exhausted = rows.len() < page_size;
            for row in &rows {
                if let (Some(ts), Some(id)) = (
                    row.first().and_then(CellValue::as_i64),
                    row.get(4).and_then(CellValue::as_i64),
                ) {
                    self.last_key = Some((ts, id));
                }
                if let Some(record) = parse_message_row(row, self.source.shard, self.source.is_group)
                {
                    if self.source.admits(&record) {
                        self.buffer.push_back(record);
                    }
                }
            }

            if !self.exhausted && self.last_key == previous {
                tracing::warn!(
                    table = %self.source.table,
                    "Chat table rows lack ordering keys; stopping early"
                );
                self.exhausted = true;
            }
        }
        Ok(())
    }
}

/// Identity used to drop duplicate records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    /// (cursor, `MesLocalID`): unique per shard and chat table.
    Row(usize, i64),
    /// (direction, content hash) at the window's timestamp.
    Content(Direction, u64),
}

/// Per-cursor occurrence counts of each key at the current timestamp.
///
/// Output is timestamp-ordered, so duplicates can only share a timestamp and
/// the window is cleared whenever it advances. The n-th occurrence of a key
/// in one cursor is a duplicate when another cursor already had n of them.
struct DedupWindow {
    policy: DedupPolicy,
    timestamp: Option<i64>,
    seen: HashMap<DedupKey, HashMap<usize, usize>>,
}

impl DedupWindow {
    fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            timestamp: None,
            seen: HashMap::new(),
        }
    }

    fn admit(&mut self, cursor: usize, record: &MessageRecord) -> bool {
        if self.timestamp != Some(record.timestamp) {
            self.timestamp = Some(record.timestamp);
            self.seen.clear();
        }
        let key = match self.policy {
            DedupPolicy::RowId => DedupKey::Row(cursor, record.origin.row_id),
            DedupPolicy::Content => {
                DedupKey::Content(record.direction, content_hash(&record.content))
            }
        };
        let counts = self.seen.entry(key).or_default();
        let count = counts.entry(cursor).or_insert(0);
        *count += 1;
        let occurrence = *count;
        !counts
            .iter()
            .any(|(&other, &n)| other != cursor && n >= occurrence)
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Lazy, timestamp-ordered stream produced by [`MergePlan::iter`].
pub struct MergedMessages<'s> {
    cursors: Vec<ShardCursor<'s>>,
    heap: BinaryHeap<Reverse<(i64, usize)>>,
    window: DedupWindow,
    page_size: usize,
    sink: &'s RefCell<Vec<ShardWarning>>,
}

impl MergedMessages<'_> {
    /// Ensures cursor `idx` has a head record and queues it.
    fn refill(&mut self, idx: usize) {
        let cursor = &mut self.cursors[idx];
        if cursor.buffer.is_empty() {
            if let Err(e) = cursor.fill(self.page_size) {
                tracing::warn!(
                    table = %cursor.source.table,
                    shard = cursor.source.shard,
                    "Dropping shard cursor: {}",
                    e
                );
                let warning = ShardWarning {
                    path: cursor.source.handle.path().to_path_buf(),
                    message: e.to_string(),
                };
                let mut sink = self.sink.borrow_mut();
                if !sink.contains(&warning) {
                    sink.push(warning);
                }
                cursor.exhausted = true;
                cursor.buffer.clear();
            }
        }
        if let Some(head) = cursor.buffer.front() {
            self.heap.push(Reverse((head.timestamp, idx)));
        }
    }
}

impl Iterator for MergedMessages<'_> {
    type Item = MessageRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Reverse((_, idx)) = self.heap.pop()?;
            let Some(record) = self.cursors[idx].buffer.pop_front() else {
                continue;
            };
            self.refill(idx);
            if self.window.admit(idx, &record) {
                return Some(record);
            }
            tracing::trace!(
                timestamp = record.timestamp,
                shard = record.origin.shard,
                "Dropped duplicate message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const ALICE: &str = "wxid_alice";
    const GROUP: &str = "123@chatroom";

    /// (CreateTime, Des, Message, MesLocalID)
    type Row<'r> = (i64, i64, &'r str, i64);

    fn write_shard(dir: &Path, number: u32, tables: &[(&str, &[Row<'_>])]) {
        let conn = Connection::open(dir.join(format!("message_{number}.sqlite"))).unwrap();
        for (id, rows) in tables {
            let table = chat_table_name(id);
            conn.execute_batch(&format!(
                "CREATE TABLE {table} (MesLocalID INTEGER PRIMARY KEY, CreateTime INTEGER,
                                       Message TEXT, Des INTEGER, Type INTEGER);"
            ))
            .unwrap();
            for (ts, des, msg, local_id) in *rows {
                conn.execute(
                    &format!("INSERT INTO {table} VALUES (?1, ?2, ?3, ?4, 1)"),
                    rusqlite::params![local_id, ts, msg, des],
                )
                .unwrap();
            }
        }
    }

    fn load(dir: &TempDir) -> Vec<LoadedShard> {
        let (shards, warnings) = crate::infrastructure::open_shards(dir.path()).unwrap();
        assert!(warnings.is_empty());
        shards
    }

    fn contents(plan: &MergePlan<'_>) -> Vec<String> {
        plan.iter().map(|m| m.content).collect()
    }

    fn options(dedup: DedupPolicy, page_size: usize) -> MergeOptions {
        MergeOptions {
            dedup,
            page_size,
            group_ids: Vec::new(),
        }
    }

    #[test]
    fn test_disjoint_shards_merge_sorted() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(10, 0, "a", 1), (30, 1, "c", 2), (50, 0, "e", 3)])]);
        write_shard(dir.path(), 2, &[(ALICE, &[(20, 1, "b", 1), (40, 0, "d", 2), (60, 1, "f", 3)])]);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &options(DedupPolicy::Content, 2));
        assert_eq!(plan.source_count(), 2);
        assert_eq!(contents(&plan), vec!["a", "b", "c", "d", "e", "f"]);

        let timestamps: Vec<_> = plan.iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_overlapping_record_is_deduplicated() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(100, 0, "hi", 1), (200, 1, "same", 2)])]);
        write_shard(dir.path(), 2, &[(ALICE, &[(200, 1, "same", 9), (300, 0, "bye", 10)])]);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &options(DedupPolicy::Content, 500));
        assert_eq!(contents(&plan), vec!["hi", "same", "bye"]);

        let by_row = merge(&shards, ALICE, &options(DedupPolicy::RowId, 500));
        assert_eq!(contents(&by_row), vec!["hi", "same", "same", "bye"]);
    }

    #[test]
    fn test_repeated_message_in_one_table_is_kept() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(100, 0, "ok", 1), (100, 0, "ok", 2)])]);
        write_shard(dir.path(), 2, &[(ALICE, &[(100, 0, "ok", 7), (100, 0, "ok", 8), (100, 0, "ok", 9)])]);
        let shards = load(&dir);

        let single = merge(&shards[..1], ALICE, &MergeOptions::default());
        assert_eq!(contents(&single), vec!["ok", "ok"]);

        // Shard 2 repeats both rows and adds a third.
        let plan = merge(&shards, ALICE, &MergeOptions::default());
        let origins: Vec<_> = plan.iter().map(|m| (m.origin.shard, m.origin.row_id)).collect();
        assert_eq!(origins, vec![(1, 1), (1, 2), (2, 9)]);
    }

    #[test]
    fn test_unreadable_table_is_reported_after_scan() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(1, 0, "x", 1)])]);
        let broken = Connection::open(dir.path().join("message_2.sqlite")).unwrap();
        broken
            .execute_batch(&format!(
                "CREATE TABLE {} (CreateTime INTEGER, Message TEXT);",
                chat_table_name(ALICE)
            ))
            .unwrap();
        drop(broken);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &MergeOptions::default());
        assert!(plan.warnings().is_empty());
        assert_eq!(contents(&plan), vec!["x"]);
        assert_eq!(contents(&plan), vec!["x"]);

        let warnings = plan.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].path.ends_with("message_2.sqlite"));
    }

    #[test]
    fn test_same_timestamp_different_direction_kept() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(5, 0, "ok", 1), (5, 1, "ok", 2)])]);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &MergeOptions::default());
        assert_eq!(plan.iter().count(), 2);
    }

    #[test]
    fn test_equal_timestamps_follow_shard_then_row_order() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 2, &[(ALICE, &[(7, 1, "s2-r1", 1)])]);
        write_shard(dir.path(), 1, &[(ALICE, &[(7, 0, "s1-r5", 5), (7, 0, "s1-r3", 3)])]);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &options(DedupPolicy::RowId, 1));
        assert_eq!(contents(&plan), vec!["s1-r3", "s1-r5", "s2-r1"]);
    }

    #[test]
    fn test_iter_is_restartable() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(1, 0, "x", 1), (2, 1, "y", 2)])]);
        let shards = load(&dir);

        let plan = merge(&shards, ALICE, &MergeOptions::default());
        let first: Vec<_> = plan.iter().take(1).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(contents(&plan), vec!["x", "y"]);
    }

    #[test]
    fn test_group_messages_from_contact() {
        let dir = tempdir().unwrap();
        write_shard(
            dir.path(),
            1,
            &[
                (ALICE, &[(10, 1, "direct", 1)]),
                (
                    GROUP,
                    &[
                        (5, 1, "wxid_alice:\nin group", 1),
                        (6, 1, "wxid_bob:\nnot alice", 2),
                        (7, 0, "mine", 3),
                    ],
                ),
            ],
        );
        let shards = load(&dir);

        let opts = MergeOptions {
            group_ids: vec![GROUP.to_string()],
            ..MergeOptions::default()
        };
        let plan = merge(&shards, ALICE, &opts);
        let records: Vec<_> = plan.iter().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "in group");
        assert_eq!(records[0].sender_id.as_deref(), Some(ALICE));
        assert_eq!(records[1].content, "direct");

        let group = merge(&shards, GROUP, &MergeOptions::default());
        let senders: Vec<_> = group.iter().map(|m| m.sender_id).collect();
        assert_eq!(
            senders,
            vec![Some("wxid_alice".to_string()), Some("wxid_bob".to_string()), None]
        );
    }

    #[test]
    fn test_unknown_contact_yields_empty() {
        let dir = tempdir().unwrap();
        write_shard(dir.path(), 1, &[(ALICE, &[(1, 0, "x", 1)])]);
        let shards = load(&dir);

        let plan = merge(&shards, "wxid_nobody", &MergeOptions::default());
        assert_eq!(plan.source_count(), 0);
        assert_eq!(plan.iter().count(), 0);
    }
}
