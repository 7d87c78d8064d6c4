//! WeChat Backup Handler - Extract WeChat databases from iOS backups and
//! export chat history.
//!
//! Reads an iOS backup's `Manifest.db` to locate WeChat's `SQLite` files in
//! the hashed store, copies them out, then merges and exports chat history.
//!
//! QUICK START:
//!   wechat-chat discover                          # List local iOS backups
//!   wechat-chat extract -o ./wechat               # Copy databases from newest backup
//!   wechat-chat contacts 张 -d ./wechat           # Find a contact
//!   wechat-chat show wxid_abc -d ./wechat --latest
//!   wechat-chat export wxid_abc -d ./wechat -f csv -o chat.csv

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wechat_backup_handler::application::{
    analyze_backup, export_records, extract_backup, format_analysis, format_backups_table,
    format_contacts_table, format_extraction_report, format_message_stats, format_orphans_table,
    format_verification, ChatSession, ExportFormat, ExportOptions, ExtractOptions, MergeOptions,
    MessageFilter, PreviewMode, TimeRange,
};
use wechat_backup_handler::domain::{AppConfig, AppError, ShardWarning};
use wechat_backup_handler::infrastructure::{
    config_file_path, discover_backups, ensure_config_exists, load_config, load_config_from_file,
    verify_extraction,
};

use cli::{Cli, Commands, ConfigAction, QueryArgs};

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from_file(path)
            .with_context(|| format!("Loading configuration from {}", path.display()))?,
        None => load_config().context("Loading configuration")?,
    };

    match cli.command {
        Commands::Discover { root } => {
            cmd_discover(root.as_deref().or(config.paths.backup_root.as_deref()))?;
        }
        Commands::Analyze { backup } => {
            cmd_analyze(&config, backup)?;
        }
        Commands::Extract {
            backup,
            output,
            only,
            shards,
            force,
        } => {
            let mut options = ExtractOptions::from_config(&config.extract);
            if let Some(selectors) = Cli::selectors(&only, &shards) {
                options.selectors = selectors;
            }
            if let Some(output) = output {
                options.output_dir = output;
            }
            options.force = force;
            cmd_extract(&config, backup, &options)?;
        }
        Commands::Verify { dir } => {
            cmd_verify(&dir.unwrap_or_else(|| config.extract.output_dir.clone()))?;
        }
        Commands::Contacts {
            query,
            dir,
            limit,
            orphans,
        } => {
            cmd_contacts(&config, dir, query.as_deref(), limit, orphans)?;
        }
        Commands::Show {
            query,
            limit,
            latest,
        } => {
            let limit = limit.unwrap_or(config.export.preview_limit);
            cmd_show(&config, &query, limit, latest)?;
        }
        Commands::Export {
            query,
            output,
            format,
        } => {
            let format: ExportFormat = format
                .as_deref()
                .unwrap_or(&config.export.format)
                .parse()
                .map_err(|message| AppError::Config { message })?;
            cmd_export(&config, &query, output.as_deref(), format)?;
        }
        Commands::Config { action } => {
            cmd_config(action)?;
        }
    }

    Ok(())
}

/// List backups command.
fn cmd_discover(root: Option<&Path>) -> anyhow::Result<()> {
    let backups = discover_backups(root)?;

    if backups.is_empty() {
        println!("{}", "No iOS backups found.".yellow());
        return Ok(());
    }

    println!("{}", format_backups_table(&backups));
    if let Some(first) = backups.first() {
        println!();
        println!("Newest: {}", first.path.display().to_string().cyan());
    }

    Ok(())
}

/// Picks the given backup or the newest discovered one.
fn pick_backup(config: &AppConfig, backup: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = backup {
        return Ok(path);
    }
    let backups = discover_backups(config.paths.backup_root.as_deref())?;
    match backups.into_iter().next() {
        Some(newest) => {
            tracing::info!(backup = %newest.path.display(), "Using newest backup");
            Ok(newest.path)
        }
        None => bail!("No iOS backups found; pass a backup directory explicitly"),
    }
}

/// Analyze backup command.
fn cmd_analyze(config: &AppConfig, backup: Option<PathBuf>) -> anyhow::Result<()> {
    let backup = pick_backup(config, backup)?;
    let analysis = analyze_backup(&backup, &config.extract.domain_patterns)
        .with_context(|| format!("Analyzing {}", backup.display()))?;

    println!("{}", format_analysis(&analysis));
    Ok(())
}

/// Extract databases command.
fn cmd_extract(
    config: &AppConfig,
    backup: Option<PathBuf>,
    options: &ExtractOptions,
) -> anyhow::Result<()> {
    let backup = pick_backup(config, backup)?;
    let report = extract_backup(&backup, options)
        .with_context(|| format!("Extracting from {}", backup.display()))?;

    println!("{}", format_extraction_report(&report));
    Ok(())
}

/// Verify extraction command.
fn cmd_verify(dir: &Path) -> anyhow::Result<()> {
    let report = verify_extraction(dir)?;

    println!("{}", format!("🔍 Verifying {}", dir.display()).bold());
    println!("{}", format_verification(&report));

    if !report.is_clean() {
        std::process::exit(2);
    }
    Ok(())
}

/// Opens the extracted databases and reports skipped files.
fn open_session(config: &AppConfig, dir: Option<PathBuf>) -> anyhow::Result<ChatSession> {
    let dir = dir.unwrap_or_else(|| config.extract.output_dir.clone());
    let session = ChatSession::open(&dir)
        .with_context(|| format!("Opening extracted databases in {}", dir.display()))?;
    print_warnings(session.warnings());
    Ok(session)
}

fn print_warnings(warnings: &[ShardWarning]) {
    for warning in warnings {
        eprintln!("{} skipped {}", "Warning:".yellow().bold(), warning);
    }
}

/// Search contacts command.
fn cmd_contacts(
    config: &AppConfig,
    dir: Option<PathBuf>,
    query: Option<&str>,
    limit: usize,
    orphans: bool,
) -> anyhow::Result<()> {
    let session = open_session(config, dir)?;

    if orphans {
        let orphans = session.orphan_chats()?;
        println!("{}", format_orphans_table(&orphans));
        println!("Total: {} chat table(s) without a contact", orphans.len());
        return Ok(());
    }

    let mut contacts = session.search(query.unwrap_or_default());
    let total = contacts.len();
    contacts.truncate(limit);

    println!("{}", format_contacts_table(&contacts));
    println!("Showing {} of {} contact(s)", contacts.len(), total);
    Ok(())
}

/// Resolves a contact argument to an identifier.
///
/// Accepts an exact identifier or a search term with a single match.
fn pick_contact(session: &ChatSession, term: &str) -> anyhow::Result<String> {
    if let Ok(contact) = session.contact(term) {
        return Ok(contact.identifier);
    }
    let hits = session.search(term);
    match hits.as_slice() {
        [] => Err(AppError::UnknownContact {
            identifier: term.to_string(),
        }
        .into()),
        [only] => Ok(only.identifier.clone()),
        many => {
            println!("{}", format_contacts_table(&many[..many.len().min(10)]));
            bail!("'{term}' matches {} contacts; use an identifier", many.len())
        }
    }
}

fn export_options(config: &AppConfig) -> anyhow::Result<ExportOptions> {
    let utc_offset = config
        .export
        .utc_offset()
        .map_err(|message| AppError::Config { message })?;
    Ok(ExportOptions {
        utc_offset,
        self_label: config.export.self_label.clone(),
    })
}

fn build_filter(
    config: &AppConfig,
    args: &QueryArgs,
    options: &ExportOptions,
) -> anyhow::Result<MessageFilter> {
    let range = TimeRange::from_inputs(args.from.as_deref(), args.to.as_deref(), options.utc_offset)?;
    let base = if config.export.text_only && !args.all_types {
        MessageFilter::text_only()
    } else {
        MessageFilter::default()
    };
    Ok(base
        .with_time_range(range)
        .with_keyword(args.keyword.as_deref()))
}

/// Opens a session with the contact resolved and any remark applied.
fn prepare_session(config: &AppConfig, args: &QueryArgs) -> anyhow::Result<(ChatSession, String)> {
    let mut session = open_session(config, args.dir.clone())?;
    let identifier = pick_contact(&session, &args.contact)?;
    if let Some(remark) = &args.remark {
        session.set_remark(&identifier, remark)?;
    }
    Ok((session, identifier))
}

fn merge_options(config: &AppConfig, args: &QueryArgs) -> MergeOptions {
    MergeOptions {
        group_ids: args.groups.clone(),
        ..MergeOptions::from_config(&config.merge)
    }
}

/// Preview chat history command.
fn cmd_show(config: &AppConfig, args: &QueryArgs, limit: usize, latest: bool) -> anyhow::Result<()> {
    let options = export_options(config)?;
    let filter = build_filter(config, args, &options)?;
    let (session, identifier) = prepare_session(config, args)?;
    let query = session.query(&identifier, &merge_options(config, args), filter)?;

    let mode = if latest {
        PreviewMode::Latest
    } else {
        PreviewMode::Earliest
    };
    let records = query.preview(limit, mode);

    let mut stdout = std::io::stdout().lock();
    export_records(&mut stdout, records, query.contact(), ExportFormat::Text, &options)?;

    println!();
    println!("{}", format_message_stats(&query.stats()));
    print_warnings(&query.warnings());
    Ok(())
}

/// Export chat history command.
fn cmd_export(
    config: &AppConfig,
    args: &QueryArgs,
    output: Option<&Path>,
    format: ExportFormat,
) -> anyhow::Result<()> {
    let options = export_options(config)?;
    let filter = build_filter(config, args, &options)?;
    let (session, identifier) = prepare_session(config, args)?;
    let query = session.query(&identifier, &merge_options(config, args), filter)?;

    match output {
        Some(path) => {
            let stats = query
                .export_to_file(path, format, &options)
                .with_context(|| format!("Exporting to {}", path.display()))?;
            println!(
                "{} Exported {} messages with {} to {}",
                "✓".green().bold(),
                stats.total,
                query.contact().display_name().cyan(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            query.export(&mut stdout, format, &options)?;
        }
    }

    print_warnings(&query.warnings());
    Ok(())
}

/// Configuration file command.
fn cmd_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            ensure_config_exists()?;
            println!("{} {}", "✓".green(), config_file_path().display());
        }
        ConfigAction::Path => {
            println!("{}", config_file_path().display());
        }
    }
    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
