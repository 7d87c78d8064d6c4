//! Query sessions over an extracted WeChat directory.
//!
//! A session owns every database handle it opens; dropping it closes them.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::{
    AppError, Contact, FileKind, MessageRecord, MessageStats, OrphanChat, Result, ShardWarning,
};
use crate::infrastructure::{open_shards, LoadedShard, ShardHandle};

use super::contacts::{self, ContactIndex, RemarkOverlay};
use super::export::{self, ExportFormat, ExportOptions, PreviewMode, RecordSource};
use super::filter::MessageFilter;
use super::merger::{merge, MergeOptions, MergePlan};

/// Contacts and message shards loaded from one extraction directory.
#[derive(Debug)]
pub struct ChatSession {
    dir: PathBuf,
    contacts: ContactIndex,
    overlay: RemarkOverlay,
    shards: Vec<LoadedShard>,
    oplog: Option<ShardHandle>,
    warnings: Vec<ShardWarning>,
}

impl ChatSession {
    /// Opens the contact database and every readable message shard in `dir`.
    ///
    /// # Errors
    /// Returns `MissingRequiredFile` or `UnreadableDatabase` if the contact
    /// database is absent or unreadable. Bad shards only produce warnings.
    pub fn open(dir: &Path) -> Result<Self> {
        let contact_name = FileKind::ContactDatabase.logical_name();
        let contact_path = dir.join(&contact_name);
        if !contact_path.is_file() {
            return Err(AppError::MissingRequiredFile {
                logical_name: contact_name,
            });
        }
        let contacts = ContactIndex::build(&ShardHandle::open_read_only(&contact_path)?)?;

        let (shards, mut warnings) = open_shards(dir)?;

        let oplog_path = dir.join(FileKind::OperationLog.logical_name());
        let oplog = if oplog_path.is_file() {
            match ShardHandle::open_read_only(&oplog_path) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(path = %oplog_path.display(), "Skipping operation log: {}", e);
                    warnings.push(ShardWarning {
                        path: oplog_path,
                        message: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        if shards.is_empty() {
            tracing::warn!(dir = %dir.display(), "No readable message shards");
        }

        tracing::info!(
            dir = %dir.display(),
            contacts = contacts.len(),
            shards = shards.len(),
            warnings = warnings.len(),
            "Opened chat session"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            contacts,
            overlay: RemarkOverlay::new(),
            shards,
            oplog,
            warnings,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub const fn contacts(&self) -> &ContactIndex {
        &self.contacts
    }

    #[must_use]
    pub fn shards(&self) -> &[LoadedShard] {
        &self.shards
    }

    #[must_use]
    pub const fn has_operation_log(&self) -> bool {
        self.oplog.is_some()
    }

    /// Files skipped while opening the session.
    #[must_use]
    pub fn warnings(&self) -> &[ShardWarning] {
        &self.warnings
    }

    /// Overrides a contact's remark for this session only.
    ///
    /// # Errors
    /// Returns `UnknownContact` if the identifier is not known.
    pub fn set_remark(&mut self, identifier: &str, remark: &str) -> Result<()> {
        self.overlay.set_remark(&self.contacts, identifier, remark)
    }

    /// Ranked contact search.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Contact> {
        contacts::search(&self.contacts, &self.overlay, query)
    }

    /// # Errors
    /// Returns `UnknownContact` if absent.
    pub fn contact(&self, identifier: &str) -> Result<Contact> {
        contacts::resolve(&self.contacts, &self.overlay, identifier)
    }

    /// Chat tables with no matching contact.
    ///
    /// # Errors
    /// Returns error if a shard's schema cannot be read.
    pub fn orphan_chats(&self) -> Result<Vec<OrphanChat>> {
        contacts::orphan_chats(&self.contacts, &self.shards)
    }

    /// Prepares a filtered, merged view of one contact's history.
    ///
    /// # Errors
    /// Returns `UnknownContact` if the identifier is not known.
    pub fn query(
        &self,
        identifier: &str,
        options: &MergeOptions,
        filter: MessageFilter,
    ) -> Result<ChatQuery<'_>> {
        let contact = self.contact(identifier)?;
        let plan = merge(&self.shards, &contact.identifier, options);
        Ok(ChatQuery {
            contact,
            plan,
            filter,
        })
    }
}

/// A contact's merged history with a filter applied.
///
/// Every scan re-runs the merge, so previews and exports are independent.
#[derive(Debug)]
pub struct ChatQuery<'s> {
    contact: Contact,
    plan: MergePlan<'s>,
    filter: MessageFilter,
}

impl ChatQuery<'_> {
    #[must_use]
    pub const fn contact(&self) -> &Contact {
        &self.contact
    }

    #[must_use]
    pub const fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    /// Shard problems found while planning the merge and by every scan run
    /// so far (previews, stats and exports included).
    #[must_use]
    pub fn warnings(&self) -> Vec<ShardWarning> {
        self.plan.warnings()
    }

    /// Starts a fresh filtered scan.
    pub fn messages(&self) -> impl Iterator<Item = MessageRecord> + '_ {
        self.filter.apply(self.plan.iter())
    }

    #[must_use]
    pub fn preview(&self, limit: usize, mode: PreviewMode) -> Vec<MessageRecord> {
        export::preview(self, limit, mode)
    }

    #[must_use]
    pub fn stats(&self) -> MessageStats {
        export::message_stats(self.messages())
    }

    /// # Errors
    /// Returns `ExportWriteFailure` on write failure.
    pub fn export<W: Write>(
        &self,
        writer: &mut W,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<MessageStats> {
        export::export_records(writer, self.messages(), &self.contact, format, options)
    }

    /// # Errors
    /// Returns `ExportWriteFailure` on write failure.
    pub fn export_to_file(
        &self,
        path: &Path,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<MessageStats> {
        export::export_to_file(path, self.messages(), &self.contact, format, options)
    }
}

impl RecordSource for ChatQuery<'_> {
    fn records(&self) -> Box<dyn Iterator<Item = MessageRecord> + '_> {
        Box::new(self.messages())
    }
}
