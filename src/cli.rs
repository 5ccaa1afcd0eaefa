use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::MigrationConfig;
use crate::migration::{
    MigrationEvent, MigrationOrchestrator, MigrationReport, MigrationRequest, MigrationTarget,
    Phase, ScanReport,
};
use crate::source::SourceKind;
use crate::thunderbird::MailboxWriter;

/// Mail Migration - recover Apple Mail data and move it into Thunderbird
#[derive(Parser, Debug)]
#[command(name = "mail-migration")]
#[command(about = "Recover Apple Mail stores and exports into Thunderbird local folders")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile a live Apple Mail store (e.g. ~/Library/Mail/V10) without writing
    ScanStore(ScanArgs),

    /// Reconcile an Apple Mail export directory without writing
    ScanExport(ScanArgs),

    /// Migrate a live Apple Mail store into a Thunderbird profile
    MigrateStore(MigrateArgs),

    /// Migrate an Apple Mail export into a Thunderbird profile
    MigrateExport(MigrateArgs),
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct SourceOptions {
    /// Only process mailboxes whose path starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Additional Apple Mail store searched for complete copies of partial messages
    #[arg(long, visible_alias = "mail-store")]
    pub secondary_root: Option<PathBuf>,

    /// Write the JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Source root directory
    pub source: PathBuf,

    #[command(flatten)]
    pub options: SourceOptions,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Source root directory
    pub source: PathBuf,

    /// Thunderbird profile directory
    pub profile: PathBuf,

    /// Local folder file relative to the profile, e.g. "Mail/Local Folders/Apple Mail"
    pub local_folder: PathBuf,

    #[command(flatten)]
    pub options: SourceOptions,

    /// Compute everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Separator sender for messages without a From header
    #[arg(long)]
    pub fallback_sender: Option<String>,
}

/// Effective settings after merging configuration and flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub prefix: Option<String>,
    pub secondary_root: Option<PathBuf>,
    pub fallback_sender: Option<String>,
    pub show_progress: bool,
}

impl RunSettings {
    /// Flags win over the configuration file
    pub fn merge(config: &MigrationConfig, options: &SourceOptions, fallback_sender: Option<&str>) -> Self {
        Self {
            prefix: options.prefix.clone().or_else(|| config.prefix.clone()),
            secondary_root: options
                .secondary_root
                .clone()
                .or_else(|| config.secondary_root.clone()),
            fallback_sender: fallback_sender
                .map(str::to_string)
                .or_else(|| config.fallback_sender.clone()),
            show_progress: options.progress || config.show_progress,
        }
    }
}

/// CLI command handler
pub struct CliHandler {
    config: MigrationConfig,
    cancelled: Arc<AtomicBool>,
}

impl CliHandler {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops a running pipeline before its next mailbox
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::ScanStore(args) => self.handle_scan(SourceKind::Store, args).await,
            Commands::ScanExport(args) => self.handle_scan(SourceKind::Export, args).await,
            Commands::MigrateStore(args) => self.handle_migrate(SourceKind::Store, args).await,
            Commands::MigrateExport(args) => self.handle_migrate(SourceKind::Export, args).await,
        }
    }

    fn orchestrator(&self, kind: SourceKind, source: PathBuf, settings: &RunSettings) -> MigrationOrchestrator {
        let request = MigrationRequest::new(kind, source)
            .with_prefix(settings.prefix.clone())
            .with_secondary_root(settings.secondary_root.clone());

        let mut writer = MailboxWriter::new();
        if let Some(sender) = &settings.fallback_sender {
            writer = writer.with_fallback_sender(sender.clone());
        }

        let mut orchestrator = MigrationOrchestrator::new(request)
            .with_writer(writer)
            .with_cancel_flag(self.cancel_flag());
        if settings.show_progress {
            let pb = create_progress_bar();
            orchestrator = orchestrator
                .with_progress(Box::new(move |event: &MigrationEvent| update_progress(&pb, event)));
        }
        orchestrator
    }

    async fn handle_scan(&self, kind: SourceKind, args: ScanArgs) -> Result<()> {
        let settings = RunSettings::merge(&self.config, &args.options, None);
        println!("🔍 Scanning {} {}", kind_label(kind), args.source.display());
        if let Some(prefix) = &settings.prefix {
            println!("📂 Prefix filter: {}", prefix);
        }

        let orchestrator = self.orchestrator(kind, args.source.clone(), &settings);
        let report = tokio::task::spawn_blocking(move || orchestrator.scan())
            .await
            .context("Scan task panicked")??;

        print_scan_summary(&report);
        if let Some(path) = &args.options.report {
            write_report(path, &report)?;
        }
        Ok(())
    }

    async fn handle_migrate(&self, kind: SourceKind, args: MigrateArgs) -> Result<()> {
        let settings = RunSettings::merge(&self.config, &args.options, args.fallback_sender.as_deref());

        println!("📥 Migrate {} into Thunderbird", kind_label(kind));
        println!("======================================\n");
        if args.dry_run {
            println!("🧪 Dry run mode - nothing will be written");
        }
        println!("📁 Source: {}", args.source.display());
        println!("📧 Profile: {}", args.profile.display());
        println!("📂 Local folder: {}", args.local_folder.display());
        if let Some(root) = &settings.secondary_root {
            println!("🗄️  Secondary store: {}", root.display());
        }

        let target = MigrationTarget::new(&args.profile, &args.local_folder).preview(args.dry_run);
        let orchestrator = self.orchestrator(kind, args.source.clone(), &settings);
        let report = tokio::task::spawn_blocking(move || orchestrator.migrate(&target))
            .await
            .context("Migration task panicked")??;

        print_migration_summary(&report);
        if let Some(path) = &args.options.report {
            write_report(path, &report)?;
        }
        if report.cancelled {
            return Err(anyhow!("Migration cancelled; rerun to continue with the remaining mailboxes"));
        }
        Ok(())
    }
}

fn kind_label(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Store => "Apple Mail store",
        SourceKind::Export => "Apple Mail export",
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("Discovering mailboxes...");
    pb
}

fn update_progress(pb: &ProgressBar, event: &MigrationEvent) {
    match event {
        MigrationEvent::MailboxesSelected { total } => pb.set_length(*total as u64),
        MigrationEvent::MailboxStarted { mailbox, .. } => pb.set_message(mailbox.clone()),
        MigrationEvent::MailboxFinished { .. } => pb.inc(1),
        MigrationEvent::PhaseStarted(Phase::Report) => pb.finish_and_clear(),
        MigrationEvent::PhaseStarted(_) => {}
    }
}

fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
    println!("📝 Report written to {}", path.display());
    Ok(())
}

fn print_scan_summary(report: &ScanReport) {
    println!("\n📊 Scan Summary:");
    println!("   Mailboxes: {}", report.mailboxes.len());
    if report.skipped_by_prefix > 0 {
        println!("   Skipped by prefix: {}", report.skipped_by_prefix);
    }
    println!("   Indexed: {}", report.totals.indexed);
    println!("   Stored complete: {}", report.totals.stored_complete);
    println!("   Stored partial: {}", report.totals.stored_partial);
    println!("   Missing: {}", report.totals.missing);
    println!("   Unindexed: {}", report.totals.unindexed);
    println!(
        "   Partials with a complete copy: {} (without: {})",
        report.recoverable_partials, report.unrecoverable_partials
    );
    let duplicates = &report.duplicates;
    if duplicates.duplicate_keys > 0 {
        println!(
            "   Duplicate messages: {} extra copies of {} messages ({} differ in size)",
            duplicates.duplicate_messages, duplicates.duplicate_keys, duplicates.mismatched_size_keys
        );
    }

    for mailbox in report.mailboxes.iter().filter(|m| m.has_discrepancies()) {
        println!(
            "   ⚠️  {}: {} partial, {} missing, {} unindexed",
            mailbox.mailbox, mailbox.counts.stored_partial, mailbox.counts.missing, mailbox.counts.unindexed
        );
    }
    print_issues(report.issues.iter().map(|i| (i.mailbox.as_deref(), i.message.as_str())));
}

fn print_migration_summary(report: &MigrationReport) {
    let totals = &report.totals;
    if report.preview {
        println!("\n📊 Preview Summary (nothing written):");
    } else {
        println!("\n📊 Migration Summary:");
    }
    println!("   Target: {}", report.target.display());
    println!("   Mailboxes processed: {}", totals.processed_mailboxes);
    println!("   Mailboxes with messages: {}", totals.migrated_mailboxes);
    println!("   Messages written: {}", totals.messages_written);
    println!("   Recovered partials: {}", totals.recovered_partials);
    println!("   Recovered missing: {}", totals.recovered_missing);
    println!("   Placeholders: {}", totals.placeholders);
    println!("   Unrecoverable: {}", totals.unrecoverable);

    for outcome in report.mailboxes.iter().filter(|o| !o.unrecoverable_uids.is_empty()) {
        println!(
            "   ⚠️  {}: unrecoverable UIDs {:?}",
            outcome.mailbox, outcome.unrecoverable_uids
        );
    }
    print_issues(report.issues.iter().map(|i| (i.mailbox.as_deref(), i.message.as_str())));

    if report.cancelled {
        println!("\n⏹️  Cancelled before all mailboxes were processed");
    } else if report.has_issues() || totals.unrecoverable > 0 {
        println!("\n⚠️  Completed with problems - see above");
    } else {
        println!("\n✅ Completed successfully");
    }
}

fn print_issues<'a>(issues: impl Iterator<Item = (Option<&'a str>, &'a str)>) {
    for (mailbox, message) in issues {
        match mailbox {
            Some(mailbox) => eprintln!("❌ {}: {}", mailbox, message),
            None => eprintln!("❌ {}", message),
        }
    }
}
