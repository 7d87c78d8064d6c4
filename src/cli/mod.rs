//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use wechat_backup_handler::application::FileSelector;

/// WeChat Backup Handler - Extract WeChat databases from iOS backups and
/// export chat history.
///
/// Typical flow: wechat-chat discover | extract | contacts 张 | export <id> -f csv
#[derive(Parser, Debug)]
#[command(name = "wechat-chat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (defaults to ~/.wechat-backup-handler/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List iOS backups on this machine.
    Discover {
        /// MobileSync backup root to scan instead of the default.
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Show which WeChat databases a backup contains.
    Analyze {
        /// Backup directory (newest discovered backup if omitted).
        backup: Option<PathBuf>,
    },

    /// Copy WeChat databases out of a backup.
    Extract {
        /// Backup directory (newest discovered backup if omitted).
        backup: Option<PathBuf>,

        /// Output directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only extract these file types.
        #[arg(long, value_enum, value_delimiter = ',')]
        only: Vec<FileType>,

        /// Extract specific message shards by number.
        #[arg(long = "shard")]
        shards: Vec<u32>,

        /// Re-copy files even if a verified copy exists.
        #[arg(long)]
        force: bool,
    },

    /// Check extracted files against their completion markers.
    Verify {
        /// Extraction directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Search contacts (all contacts if no query).
    Contacts {
        /// Substring of identifier, name or remark.
        query: Option<String>,

        /// Extraction directory.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Maximum number of contacts to list.
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// List chat tables that match no contact.
        #[arg(long)]
        orphans: bool,
    },

    /// Preview a contact's chat history.
    Show {
        #[command(flatten)]
        query: QueryArgs,

        /// Number of messages to show.
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Show the most recent messages instead of the earliest.
        #[arg(long)]
        latest: bool,
    },

    /// Export a contact's chat history.
    Export {
        #[command(flatten)]
        query: QueryArgs,

        /// Output file (stdout if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: text, json, or csv.
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Write the default configuration file if none exists.
    Init,
    /// Print the configuration file path.
    Path,
}

/// File types selectable for extraction.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Main,
    Contacts,
    Messages,
    Oplog,
}

impl From<FileType> for FileSelector {
    fn from(value: FileType) -> Self {
        match value {
            FileType::Main => Self::Main,
            FileType::Contacts => Self::Contacts,
            FileType::Messages => Self::Messages,
            FileType::Oplog => Self::OperationLog,
        }
    }
}

/// Contact selection and filters shared by `show` and `export`.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Contact identifier, or a search term matching exactly one contact.
    pub contact: String,

    /// Extraction directory.
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Start date (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS, MM-DD, ...).
    #[arg(long)]
    pub from: Option<String>,

    /// End date, inclusive; a date alone means the end of that day.
    #[arg(long)]
    pub to: Option<String>,

    /// Keep messages containing this text (case-insensitive).
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Include images, voice and other non-text messages.
    #[arg(long)]
    pub all_types: bool,

    /// Display name to use for the contact in this export.
    #[arg(long)]
    pub remark: Option<String>,

    /// Also include the contact's messages in these group chats.
    #[arg(long = "group")]
    pub groups: Vec<String>,
}

impl Cli {
    /// Selectors requested by `extract --only/--shard`, if any.
    #[must_use]
    pub fn selectors(only: &[FileType], shards: &[u32]) -> Option<Vec<FileSelector>> {
        if only.is_empty() && shards.is_empty() {
            return None;
        }
        let mut selectors: Vec<FileSelector> = only.iter().copied().map(Into::into).collect();
        selectors.extend(shards.iter().map(|n| FileSelector::MessageShard(*n)));
        Some(selectors)
    }
}
