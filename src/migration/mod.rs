//! Apple Mail to Thunderbird migration
//!
//! The orchestrator runs Discover, Reconcile, Resolve, Write (or Preview) and
//! Report over the mailboxes of one source tree. Per-mailbox failures become
//! [`MigrationIssue`]s in the report; only a missing source, an empty source,
//! or an unusable target stop the run.

pub mod engine;

pub use engine::MigrationOrchestrator;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::reconcile::{ReconciliationCounts, ReconciliationReport};
use crate::recovery::DuplicateStats;
use crate::source::SourceKind;
use crate::thunderbird::WriteMode;

/// Pipeline phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Discover,
    Reconcile,
    Resolve,
    Write,
    Preview,
    Report,
}

/// Progress notifications; the core never prints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    PhaseStarted(Phase),
    /// Mailboxes left after the prefix filter
    MailboxesSelected { total: usize },
    MailboxStarted {
        position: usize,
        total: usize,
        mailbox: String,
    },
    MailboxFinished {
        position: usize,
        total: usize,
        mailbox: String,
        messages_written: usize,
    },
}

/// Progress callback invoked synchronously from the pipeline
pub type ProgressCallback = Box<dyn Fn(&MigrationEvent) + Send + Sync>;

/// What a run reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub kind: SourceKind,
    pub source_root: PathBuf,
    pub prefix: Option<String>,
    /// Extra store root searched for complete copies
    pub secondary_root: Option<PathBuf>,
}

impl MigrationRequest {
    pub fn new(kind: SourceKind, source_root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source_root: source_root.into(),
            prefix: None,
            secondary_root: None,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_secondary_root(mut self, root: Option<PathBuf>) -> Self {
        self.secondary_root = root;
        self
    }
}

/// Where migrated mail goes: a local folder file relative to a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub profile_root: PathBuf,
    /// e.g. `Mail/Local Folders/Apple Mail`
    pub local_folder: PathBuf,
    pub mode: WriteMode,
}

impl MigrationTarget {
    pub fn new(profile_root: impl Into<PathBuf>, local_folder: impl Into<PathBuf>) -> Self {
        Self {
            profile_root: profile_root.into(),
            local_folder: local_folder.into(),
            mode: WriteMode::Append,
        }
    }

    pub fn preview(mut self, preview: bool) -> Self {
        self.mode = if preview {
            WriteMode::Preview
        } else {
            WriteMode::Append
        };
        self
    }
}

/// Category of a per-mailbox or run-level problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Discovery,
    FatalIndex,
    RecoveryIndex,
    Write,
}

/// A problem that did not stop the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationIssue {
    pub mailbox: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl MigrationIssue {
    pub fn new(mailbox: Option<&str>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.map(str::to_string),
            kind,
            message: message.into(),
        }
    }
}

/// Result of a read-only scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub kind: SourceKind,
    pub skipped_by_prefix: usize,
    pub totals: ReconciliationCounts,
    /// Partials with a complete copy in the recovery index
    pub recoverable_partials: usize,
    pub unrecoverable_partials: usize,
    /// Complete copies sharing a message key across the recovery roots
    #[serde(flatten)]
    pub duplicates: DuplicateStats,
    pub mailboxes: Vec<ReconciliationReport>,
    pub issues: Vec<MigrationIssue>,
}

/// What happened to one mailbox during migration
#[derive(Debug, Clone, Serialize)]
pub struct MailboxOutcome {
    pub mailbox: String,
    pub target_file: PathBuf,
    pub reconciliation: ReconciliationReport,
    pub skipped_files: usize,
    pub messages_written: usize,
    pub recovered_partials: usize,
    pub recovered_missing: usize,
    pub placeholders: usize,
    /// Partial UIDs with no payload anywhere
    pub unrecoverable_uids: Vec<u64>,
    /// Indexed UIDs that stayed missing
    pub unresolved_missing_uids: Vec<u64>,
}

/// Run totals across mailboxes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationTotals {
    pub processed_mailboxes: usize,
    pub migrated_mailboxes: usize,
    pub messages_written: usize,
    pub recovered_partials: usize,
    pub recovered_missing: usize,
    pub placeholders: usize,
    pub unrecoverable: usize,
}

impl MigrationTotals {
    fn add(&mut self, outcome: &MailboxOutcome) {
        self.processed_mailboxes += 1;
        if outcome.messages_written > 0 {
            self.migrated_mailboxes += 1;
        }
        self.messages_written += outcome.messages_written;
        self.recovered_partials += outcome.recovered_partials;
        self.recovered_missing += outcome.recovered_missing;
        self.placeholders += outcome.placeholders;
        self.unrecoverable += outcome.unrecoverable_uids.len();
    }
}

/// Result of a migration run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub generated_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub kind: SourceKind,
    /// Base local folder file
    pub target: PathBuf,
    pub preview: bool,
    pub cancelled: bool,
    pub skipped_by_prefix: usize,
    pub totals: MigrationTotals,
    pub mailboxes: Vec<MailboxOutcome>,
    pub issues: Vec<MigrationIssue>,
}

impl MigrationReport {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}
