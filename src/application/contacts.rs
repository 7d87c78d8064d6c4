//! Contact resolution.
//!
//! Builds the contact index from `WCDB_Contact.sqlite` and layers session-only
//! remark overrides on top of it.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{AppError, Contact, OrphanChat, Result};
use crate::infrastructure::{CellValue, LoadedShard, ShardHandle, TableScan};

use super::parser::{chat_hash, decode_contact_remark, CHAT_TABLE_PREFIX};

const FRIEND_TABLE: &str = "Friend";
const FRIEND_COLUMNS: &[&str] = &["userName", "dbContactRemark"];

/// Read-only contacts of one account, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct ContactIndex {
    contacts: BTreeMap<String, Contact>,
}

impl ContactIndex {
    /// Loads every row of the `Friend` table.
    ///
    /// # Errors
    /// Returns error if the table cannot be scanned.
    pub fn build(handle: &ShardHandle) -> Result<Self> {
        let rows = handle.scan(&TableScan::new(FRIEND_TABLE, FRIEND_COLUMNS))?;

        let index = Self::from_contacts(rows.into_iter().filter_map(|row| {
            let identifier = row.first()?.to_text()?.trim().to_string();
            if identifier.is_empty() {
                return None;
            }
            let fields = row
                .get(1)
                .and_then(CellValue::as_bytes)
                .map(decode_contact_remark)
                .unwrap_or_default();
            Some(Contact {
                raw_name: fields.nickname.unwrap_or_else(|| identifier.clone()),
                remark: fields.remark,
                identifier,
            })
        }));

        tracing::info!(
            path = %handle.path().display(),
            contacts = index.len(),
            "Loaded contacts"
        );

        Ok(index)
    }

    /// Builds an index from contacts; later duplicates replace earlier ones.
    pub fn from_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        Self {
            contacts: contacts
                .into_iter()
                .map(|c| (c.identifier.clone(), c))
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Contact> {
        self.contacts.get(identifier)
    }

    /// Contacts ordered by identifier.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }
}

/// Session-local remark overrides.
///
/// Never written back to the source database.
#[derive(Debug, Clone, Default)]
pub struct RemarkOverlay {
    remarks: HashMap<String, String>,
}

impl RemarkOverlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the remark of a known contact.
    ///
    /// # Errors
    /// Returns `UnknownContact` if the identifier is not in `index`.
    pub fn set_remark(
        &mut self,
        index: &ContactIndex,
        identifier: &str,
        remark: impl Into<String>,
    ) -> Result<()> {
        if index.get(identifier).is_none() {
            return Err(AppError::UnknownContact {
                identifier: identifier.to_string(),
            });
        }
        self.remarks.insert(identifier.to_string(), remark.into());
        Ok(())
    }

    /// Contact with any override applied.
    #[must_use]
    pub fn apply(&self, contact: &Contact) -> Contact {
        let mut contact = contact.clone();
        if let Some(remark) = self.remarks.get(&contact.identifier) {
            contact.remark = Some(remark.clone());
        }
        contact
    }
}

/// Looks up a contact, with session overrides applied.
///
/// # Errors
/// Returns `UnknownContact` if absent.
pub fn resolve(index: &ContactIndex, overlay: &RemarkOverlay, identifier: &str) -> Result<Contact> {
    index
        .get(identifier)
        .map(|c| overlay.apply(c))
        .ok_or_else(|| AppError::UnknownContact {
            identifier: identifier.to_string(),
        })
}

/// How well a contact matched a query; lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Exact,
    Prefix,
    Substring,
}

fn rank(contact: &Contact, query: &str) -> Option<MatchRank> {
    [
        Some(contact.identifier.as_str()),
        Some(contact.raw_name.as_str()),
        contact.remark.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter_map(|field| {
        let field = field.to_lowercase();
        if field == query {
            Some(MatchRank::Exact)
        } else if field.starts_with(query) {
            Some(MatchRank::Prefix)
        } else if field.contains(query) {
            Some(MatchRank::Substring)
        } else {
            None
        }
    })
    .min()
}

/// Case-insensitive search over identifier, nickname and remark.
///
/// Exact matches come first, then prefix, then substring matches; ties are
/// ordered by identifier. An empty query returns every contact.
#[must_use]
pub fn search(index: &ContactIndex, overlay: &RemarkOverlay, query: &str) -> Vec<Contact> {
    let query = query.trim().to_lowercase();

    let mut hits: Vec<(MatchRank, Contact)> = index
        .iter()
        .map(|c| overlay.apply(c))
        .filter_map(|c| {
            if query.is_empty() {
                Some((MatchRank::Substring, c))
            } else {
                rank(&c, &query).map(|r| (r, c))
            }
        })
        .collect();

    // Index iteration is already identifier-ordered; a stable sort keeps it.
    hits.sort_by_key(|(rank, _)| *rank);
    hits.into_iter().map(|(_, c)| c).collect()
}

/// Chat tables across shards whose hash matches no known contact.
///
/// # Errors
/// Returns error if a shard's schema or row count cannot be read.
pub fn orphan_chats(index: &ContactIndex, shards: &[LoadedShard]) -> Result<Vec<OrphanChat>> {
    let known: std::collections::HashSet<String> =
        index.iter().map(|c| chat_hash(&c.identifier)).collect();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for shard in shards {
        for table in shard.handle.table_names(CHAT_TABLE_PREFIX)? {
            let Some(hash) = table.strip_prefix(CHAT_TABLE_PREFIX) else {
                continue;
            };
            if known.contains(hash) {
                continue;
            }
            *counts.entry(hash.to_string()).or_default() += shard.handle.count_rows(&table)?;
        }
    }

    Ok(counts
        .into_iter()
        .map(|(table_hash, message_count)| OrphanChat {
            table_hash,
            message_count,
        })
        .collect())
}
