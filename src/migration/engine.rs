use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    IssueKind, MailboxOutcome, MigrationEvent, MigrationIssue, MigrationReport, MigrationRequest,
    MigrationTarget, MigrationTotals, Phase, ProgressCallback, ScanReport,
};
use crate::error::{DiscoveryError, FatalIndexError, MigrationError, MigrationResult};
use crate::index::{IndexEntry, INDEX_FILE_NAMES};
use crate::reconcile::{ReconciliationCounts, ReconciliationReport, Reconciler};
use crate::recovery::{PartialResolver, Provenance, RecoveryIndex, RecoverySource, ResolvedMessage};
use crate::source::{
    EnvelopeListing, ExportModel, MailSource, Mailbox, SourceKind, StoreModel,
};
use crate::thunderbird::{
    compute_mailbox_path, ensure_local_folder, ensure_mailbox_path, MailboxWriter, WriteMode,
};

/// Mailboxes that survived discovery and the prefix filter
struct Selection {
    mailboxes: Vec<Mailbox>,
    skipped_by_prefix: usize,
    issues: Vec<MigrationIssue>,
}

/// Runs one scan or migration over a source tree
pub struct MigrationOrchestrator {
    request: MigrationRequest,
    source: Box<dyn MailSource + Send + Sync>,
    writer: MailboxWriter,
    progress: Option<ProgressCallback>,
    cancelled: Arc<AtomicBool>,
}

impl MigrationOrchestrator {
    pub fn new(request: MigrationRequest) -> Self {
        let source: Box<dyn MailSource + Send + Sync> = match request.kind {
            SourceKind::Store => Box::new(StoreModel::new()),
            SourceKind::Export => Box::new(ExportModel::new()),
        };
        Self {
            request,
            source,
            writer: MailboxWriter::new(),
            progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_writer(mut self, writer: MailboxWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Share a cancellation flag; it is checked before each mailbox
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Discover → Reconcile without writing anything
    pub fn scan(&self) -> MigrationResult<ScanReport> {
        let mut selection = self.select()?;
        let recovery = self.build_recovery_index(&mut selection.issues);

        self.emit(MigrationEvent::PhaseStarted(Phase::Reconcile));
        let total = selection.mailboxes.len();
        let mut totals = ReconciliationCounts::default();
        let mut reports = Vec::with_capacity(total);
        let mut recoverable_partials = 0;
        let mut unrecoverable_partials = 0;

        for (position, mailbox) in selection.mailboxes.iter().enumerate() {
            if self.is_cancelled() {
                info!("Scan cancelled before mailbox '{}'", mailbox.display_path);
                break;
            }
            self.emit(MigrationEvent::MailboxStarted {
                position,
                total,
                mailbox: mailbox.display_path.clone(),
            });

            let Some((listing, entries)) = self.load_mailbox(mailbox, &mut selection.issues) else {
                continue;
            };
            let reconciliation = Reconciler::pair(mailbox, entries.as_deref(), &listing);

            let partials = reconciliation
                .indexed
                .iter()
                .filter_map(|(_, found)| *found)
                .chain(reconciliation.unindexed.iter().copied())
                .filter(|envelope| !envelope.is_complete());
            for partial in partials {
                let key = partial.envelope.headers().message_key();
                let resolvable = recovery
                    .as_ref()
                    .map_or(false, |index| index.has_candidate(partial.uid, key.as_ref()));
                if resolvable {
                    recoverable_partials += 1;
                } else {
                    unrecoverable_partials += 1;
                }
            }

            totals.add(&reconciliation.report.counts);
            self.emit(MigrationEvent::MailboxFinished {
                position,
                total,
                mailbox: mailbox.display_path.clone(),
                messages_written: 0,
            });
            reports.push(reconciliation.report);
        }

        self.emit(MigrationEvent::PhaseStarted(Phase::Report));
        Ok(ScanReport {
            generated_at: Utc::now(),
            source_root: self.request.source_root.clone(),
            kind: self.request.kind,
            skipped_by_prefix: selection.skipped_by_prefix,
            totals,
            recoverable_partials,
            unrecoverable_partials,
            duplicates: recovery
                .as_ref()
                .map(RecoveryIndex::duplicate_stats)
                .unwrap_or_default(),
            mailboxes: reports,
            issues: selection.issues,
        })
    }

    /// Full pipeline into `target`
    pub fn migrate(&self, target: &MigrationTarget) -> MigrationResult<MigrationReport> {
        let base = self.prepare_target(target)?;
        let mut selection = self.select()?;

        self.emit(MigrationEvent::PhaseStarted(Phase::Resolve));
        let recovery = self.build_recovery_index(&mut selection.issues);
        let resolver = PartialResolver::new(recovery.as_ref());

        self.emit(MigrationEvent::PhaseStarted(match target.mode {
            WriteMode::Append => Phase::Write,
            WriteMode::Preview => Phase::Preview,
        }));

        let total = selection.mailboxes.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut totals = MigrationTotals::default();
        let mut cancelled = false;

        for (position, mailbox) in selection.mailboxes.iter().enumerate() {
            if self.is_cancelled() {
                info!("Migration cancelled before mailbox '{}'", mailbox.display_path);
                cancelled = true;
                break;
            }
            self.emit(MigrationEvent::MailboxStarted {
                position,
                total,
                mailbox: mailbox.display_path.clone(),
            });

            let outcome =
                self.migrate_mailbox(mailbox, &base, target.mode, &resolver, &mut selection.issues);
            let messages_written = outcome.as_ref().map_or(0, |o| o.messages_written);
            if let Some(outcome) = outcome {
                totals.add(&outcome);
                outcomes.push(outcome);
            }

            self.emit(MigrationEvent::MailboxFinished {
                position,
                total,
                mailbox: mailbox.display_path.clone(),
                messages_written,
            });
        }

        self.emit(MigrationEvent::PhaseStarted(Phase::Report));
        info!(
            "Migration finished: {} messages into {} mailboxes, {} unrecoverable",
            totals.messages_written, totals.migrated_mailboxes, totals.unrecoverable
        );

        Ok(MigrationReport {
            generated_at: Utc::now(),
            source_root: self.request.source_root.clone(),
            kind: self.request.kind,
            target: base,
            preview: target.mode == WriteMode::Preview,
            cancelled,
            skipped_by_prefix: selection.skipped_by_prefix,
            totals,
            mailboxes: outcomes,
            issues: selection.issues,
        })
    }

    /// Validate the profile and resolve the base local folder file
    fn prepare_target(&self, target: &MigrationTarget) -> MigrationResult<PathBuf> {
        if !target.profile_root.is_dir() {
            return Err(MigrationError::ProfileNotFound(target.profile_root.clone()));
        }
        if target.local_folder.is_absolute() || target.local_folder.as_os_str().is_empty() {
            return Err(MigrationError::InvalidTarget(format!(
                "local folder {} must be a non-empty path relative to the profile",
                target.local_folder.display()
            )));
        }

        match target.mode {
            WriteMode::Preview => Ok(target.profile_root.join(&target.local_folder)),
            WriteMode::Append => Ok(ensure_local_folder(
                &target.profile_root,
                &target.local_folder,
            )?),
        }
    }

    fn select(&self) -> MigrationResult<Selection> {
        let root = &self.request.source_root;
        if !root.exists() {
            return Err(MigrationError::SourceNotFound(root.clone()));
        }

        self.emit(MigrationEvent::PhaseStarted(Phase::Discover));
        let discovery = self.source.discover(root).map_err(|e| match e {
            DiscoveryError::RootNotFound(path) => MigrationError::SourceNotFound(path),
            other => MigrationError::Discovery(other),
        })?;

        let issues: Vec<MigrationIssue> = discovery
            .errors
            .iter()
            .map(|e| MigrationIssue::new(None, IssueKind::Discovery, e.to_string()))
            .collect();

        if discovery.mailboxes.is_empty() {
            return Err(MigrationError::NothingDiscovered(root.clone()));
        }

        let discovered = discovery.mailboxes.len();
        let mailboxes: Vec<Mailbox> = match &self.request.prefix {
            Some(prefix) => discovery
                .mailboxes
                .into_iter()
                .filter(|mailbox| mailbox.matches_prefix(prefix))
                .collect(),
            None => discovery.mailboxes,
        };
        let skipped_by_prefix = discovered - mailboxes.len();
        if skipped_by_prefix > 0 {
            debug!("Prefix filter skipped {} mailboxes", skipped_by_prefix);
        }

        self.emit(MigrationEvent::MailboxesSelected {
            total: mailboxes.len(),
        });
        Ok(Selection {
            mailboxes,
            skipped_by_prefix,
            issues,
        })
    }

    /// Store runs index their own root as primary; any run indexes the
    /// secondary root
    fn build_recovery_index(&self, issues: &mut Vec<MigrationIssue>) -> Option<RecoveryIndex> {
        let primary = match self.request.kind {
            SourceKind::Store => Some(self.request.source_root.as_path()),
            SourceKind::Export => None,
        };
        let secondary: Vec<&Path> = self
            .request
            .secondary_root
            .as_deref()
            .filter(|secondary| Some(*secondary) != primary)
            .into_iter()
            .collect();
        if primary.is_none() && secondary.is_empty() {
            return None;
        }

        let (index, errors) = RecoveryIndex::build_with_primary(primary, &secondary);
        issues.extend(
            errors
                .iter()
                .map(|e| MigrationIssue::new(None, IssueKind::RecoveryIndex, e.to_string())),
        );
        Some(index)
    }

    /// List envelopes and read the index, recording why a mailbox is skipped
    fn load_mailbox(
        &self,
        mailbox: &Mailbox,
        issues: &mut Vec<MigrationIssue>,
    ) -> Option<(EnvelopeListing, Option<Vec<IndexEntry>>)> {
        let name = mailbox.display_path.as_str();

        let listing = match self.source.list_envelopes(mailbox) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Skipping mailbox '{}': {}", name, e);
                issues.push(MigrationIssue::new(Some(name), IssueKind::Discovery, e.to_string()));
                return None;
            }
        };

        let entries = match self.source.read_index(mailbox) {
            Ok(entries) => entries,
            Err(source) => {
                let err = FatalIndexError {
                    mailbox: name.to_string(),
                    path: index_path(mailbox),
                    source,
                };
                warn!("{}", err);
                issues.push(MigrationIssue::new(Some(name), IssueKind::FatalIndex, err.to_string()));
                return None;
            }
        };

        Some((listing, entries))
    }

    fn migrate_mailbox(
        &self,
        mailbox: &Mailbox,
        base: &Path,
        mode: WriteMode,
        resolver: &PartialResolver<'_>,
        issues: &mut Vec<MigrationIssue>,
    ) -> Option<MailboxOutcome> {
        let name = mailbox.display_path.as_str();
        let (listing, entries) = self.load_mailbox(mailbox, issues)?;
        let (report, plan) = plan_mailbox(mailbox, entries.as_deref(), &listing);
        let EnvelopeListing {
            mut envelopes,
            skipped_files,
        } = listing;

        let mut resolved: Vec<ResolvedMessage> = Vec::with_capacity(plan.len());
        let mut unresolved_missing_uids = Vec::new();

        for step in plan {
            match step {
                PlannedMessage::Stored { entry, file_name } => {
                    let Some(envelope) = envelopes.remove(&file_name) else {
                        debug!("Envelope {} already consumed in '{}'", file_name, name);
                        continue;
                    };
                    if envelope.is_complete() {
                        resolved.push(ResolvedMessage::complete(envelope, entry.as_ref()));
                    } else {
                        resolved.push(resolver.resolve(&envelope, entry.as_ref()));
                    }
                }
                PlannedMessage::Missing(entry) => {
                    let message = resolver.recover_missing(&entry);
                    if message.provenance == Provenance::Unrecoverable {
                        unresolved_missing_uids.push(entry.uid);
                    } else {
                        resolved.push(message);
                    }
                }
            }
        }
        drop(envelopes);

        let mut outcome = MailboxOutcome {
            mailbox: name.to_string(),
            target_file: PathBuf::new(),
            reconciliation: report,
            skipped_files,
            messages_written: 0,
            recovered_partials: 0,
            recovered_missing: 0,
            placeholders: 0,
            unrecoverable_uids: Vec::new(),
            unresolved_missing_uids,
        };

        let mut writable = Vec::with_capacity(resolved.len());
        for message in resolved {
            match (&message.provenance, &message.source) {
                (Provenance::Unrecoverable, _) => {
                    outcome.unrecoverable_uids.push(message.uid);
                    continue;
                }
                (Provenance::Recovered, RecoverySource::Placeholder) => outcome.placeholders += 1,
                (Provenance::Recovered, _)
                    if outcome.reconciliation.missing_uids.contains(&message.uid) =>
                {
                    outcome.recovered_missing += 1
                }
                (Provenance::Recovered, _) => outcome.recovered_partials += 1,
                (Provenance::Complete, _) => {}
            }
            writable.push(message);
        }
        writable.sort_by_key(|message| message.uid);

        let segments = mailbox.segment_names();
        let target_file = match mode {
            WriteMode::Preview => compute_mailbox_path(base, &segments),
            WriteMode::Append => match ensure_mailbox_path(base, &segments) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Cannot create target for '{}': {}", name, e);
                    issues.push(MigrationIssue::new(Some(name), IssueKind::Write, e.to_string()));
                    return Some(outcome);
                }
            },
        };
        outcome.target_file = target_file.clone();

        match self.writer.append(&target_file, &writable, mode) {
            Ok(result) => outcome.messages_written = result.messages_written,
            Err(e) => {
                warn!("Writing '{}' failed: {}", name, e);
                issues.push(MigrationIssue::new(Some(name), IssueKind::Write, e.to_string()));
            }
        }

        debug!(
            "Mailbox '{}' -> {}: {} written, {} unrecoverable",
            name,
            outcome.target_file.display(),
            outcome.messages_written,
            outcome.unrecoverable_uids.len()
        );
        Some(outcome)
    }
}

/// What to do with one message of a mailbox, detached from the listing so
/// that envelopes can be moved out of it
enum PlannedMessage {
    Stored {
        entry: Option<IndexEntry>,
        file_name: String,
    },
    Missing(IndexEntry),
}

fn plan_mailbox(
    mailbox: &Mailbox,
    entries: Option<&[IndexEntry]>,
    listing: &EnvelopeListing,
) -> (ReconciliationReport, Vec<PlannedMessage>) {
    let reconciliation = Reconciler::pair(mailbox, entries, listing);
    let mut plan = Vec::with_capacity(reconciliation.indexed.len() + reconciliation.unindexed.len());

    for &(entry, found) in &reconciliation.indexed {
        plan.push(match found {
            Some(envelope) => PlannedMessage::Stored {
                entry: Some(entry.clone()),
                file_name: envelope.file_name.clone(),
            },
            None => PlannedMessage::Missing(entry.clone()),
        });
    }
    plan.extend(
        reconciliation
            .unindexed
            .iter()
            .map(|envelope| PlannedMessage::Stored {
                entry: None,
                file_name: envelope.file_name.clone(),
            }),
    );
    (reconciliation.report, plan)
}

/// Best guess at which index file failed, for the report
fn index_path(mailbox: &Mailbox) -> PathBuf {
    INDEX_FILE_NAMES
        .iter()
        .map(|name| mailbox.directory.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| mailbox.directory.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emlx::codec::test_support::{encode, encode_with_length, flags_dict};
    use crate::index::test_support::index_bytes;
    use crate::source::store::test_support::write_store_envelope;
    use crate::thunderbird::MboxReader;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn message(subject: &str) -> Vec<u8> {
        format!(
            "From: Sender <sender@example.com>\nSubject: {}\nDate: Mon, 01 Jan 2001 12:00:00 +0000\n\nFrom the body\n",
            subject
        )
        .into_bytes()
    }

    struct Fixture {
        _temp: TempDir,
        store: PathBuf,
        profile: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("V10");
        let profile = temp.path().join("profile");
        fs::create_dir_all(&profile).unwrap();

        let inbox = store.join("Inbox.mbox");
        write_store_envelope(&inbox, "1.emlx", &encode(&message("one"), Some(flags_dict(1))));
        write_store_envelope(&inbox, "2.emlx", &encode(&message("two"), None));
        write_store_envelope(&inbox, "42.partial.emlx", &encode_with_length(4000, b"", None));
        fs::write(inbox.join("table_of_contents"), index_bytes(&[1, 2, 3, 42])).unwrap();

        let archive = store.join("Archive.mbox");
        write_store_envelope(&archive, "3.emlx", &encode(&message("three"), None));

        Fixture {
            _temp: temp,
            store,
            profile,
        }
    }

    #[test]
    fn test_migrate_store_end_to_end() {
        let fx = fixture();
        let orchestrator = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store));
        let target = MigrationTarget::new(&fx.profile, "Mail/Local Folders/Apple");

        let report = orchestrator.migrate(&target).unwrap();
        assert!(!report.preview);
        assert_eq!(report.totals.processed_mailboxes, 2);

        let inbox = report.mailboxes.iter().find(|o| o.mailbox == "Inbox").unwrap();
        assert_eq!(inbox.reconciliation.counts.stored_complete, 2);
        assert_eq!(inbox.reconciliation.counts.stored_partial, 1);
        assert_eq!(inbox.reconciliation.missing_uids, vec![3]);
        assert_eq!(inbox.recovered_missing, 0);
        assert_eq!(inbox.unresolved_missing_uids, vec![3]);
        assert_eq!(inbox.unrecoverable_uids, vec![42]);
        assert_eq!(inbox.messages_written, 2);

        let written = MboxReader::read_file(&inbox.target_file).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].headers().get("X-Mozilla-Status"), Some("0001"));
        assert!(inbox
            .target_file
            .ends_with("Mail/Local Folders/Apple.sbd/Inbox"));
    }

    #[test]
    fn test_preview_writes_nothing() {
        let fx = fixture();
        let orchestrator = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store));
        let target = MigrationTarget::new(&fx.profile, "Mail/Local Folders/Apple").preview(true);

        let report = orchestrator.migrate(&target).unwrap();
        assert!(report.preview);
        assert_eq!(report.totals.messages_written, 3);
        assert!(!fx.profile.join("Mail").exists());
    }

    #[test]
    fn test_stale_index_entry_is_written_once() {
        // Inbox's index still lists UID 3, whose only file is in Archive
        let fx = fixture();
        let report = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store))
            .migrate(&MigrationTarget::new(&fx.profile, "Imported"))
            .unwrap();
        assert_eq!(report.totals.messages_written, 3);
        assert_eq!(report.totals.recovered_missing, 0);

        let copies: usize = report
            .mailboxes
            .iter()
            .flat_map(|outcome| MboxReader::read_file(&outcome.target_file).unwrap())
            .filter(|message| message.headers().get("Subject") == Some("three"))
            .count();
        assert_eq!(copies, 1);
        let archive = report.mailboxes.iter().find(|o| o.mailbox == "Archive").unwrap();
        assert_eq!(archive.messages_written, 1);
    }

    #[test]
    fn test_missing_entry_recovered_from_secondary_root() {
        let fx = fixture();
        let backup = fx.profile.with_file_name("Backup");
        write_store_envelope(&backup.join("Old.mbox"), "3.emlx", &encode(&message("three"), None));

        let request = MigrationRequest::new(SourceKind::Store, &fx.store)
            .with_secondary_root(Some(backup));
        let report = MigrationOrchestrator::new(request)
            .migrate(&MigrationTarget::new(&fx.profile, "Imported"))
            .unwrap();

        let inbox = report.mailboxes.iter().find(|o| o.mailbox == "Inbox").unwrap();
        assert_eq!(inbox.recovered_missing, 1);
        assert!(inbox.unresolved_missing_uids.is_empty());
        let written = MboxReader::read_file(&inbox.target_file).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[2].headers().get("Subject"), Some("three"));
    }

    #[test]
    fn test_prefix_filter_and_events() {
        let fx = fixture();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let orchestrator = MigrationOrchestrator::new(
            MigrationRequest::new(SourceKind::Store, &fx.store).with_prefix(Some("Arch".to_string())),
        )
        .with_progress(Box::new(move |event: &MigrationEvent| sink.lock().unwrap().push(event.clone())));

        let report = orchestrator.scan().unwrap();
        assert_eq!(report.skipped_by_prefix, 1);
        assert_eq!(report.mailboxes.len(), 1);

        let events = events.lock().unwrap();
        assert!(events.contains(&MigrationEvent::MailboxesSelected { total: 1 }));
        assert!(events.contains(&MigrationEvent::PhaseStarted(Phase::Report)));
    }

    #[test]
    fn test_scan_counts_resolvable_partials() {
        let fx = fixture();
        write_store_envelope(
            &fx.store.join("Inbox.mbox"),
            "7.partial.emlx",
            &encode_with_length(900, b"", None),
        );
        write_store_envelope(&fx.store.join("Archive.mbox"), "7.emlx", &encode(&message("seven"), None));

        let report = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store))
            .scan()
            .unwrap();
        assert_eq!(report.recoverable_partials, 1);
        assert_eq!(report.unrecoverable_partials, 1);
        // 7 in Inbox, 3 and 7 in Archive
        assert_eq!(report.totals.unindexed, 3);
        assert_eq!(report.duplicates.duplicate_keys, 0);
    }

    #[test]
    fn test_scan_reports_duplicate_copies() {
        let fx = fixture();
        let archive = fx.store.join("Archive.mbox");
        write_store_envelope(&archive, "11.emlx", &encode(&message("one"), None));
        // Same headers as UID 2, longer body
        let mut longer = message("two");
        longer.extend_from_slice(b"More body\n");
        write_store_envelope(&archive, "12.emlx", &encode(&longer, None));

        let report = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store))
            .scan()
            .unwrap();
        assert_eq!(report.duplicates.duplicate_keys, 2);
        assert_eq!(report.duplicates.duplicate_messages, 2);
        assert_eq!(report.duplicates.mismatched_size_keys, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["duplicate_keys"], 2);
        assert_eq!(json["mismatched_size_keys"], 1);
    }

    #[test]
    fn test_cancel_before_first_mailbox() {
        let fx = fixture();
        let orchestrator = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store));
        orchestrator.cancel_flag().store(true, Ordering::SeqCst);

        let report = orchestrator
            .migrate(&MigrationTarget::new(&fx.profile, "Imported"))
            .unwrap();
        assert!(report.cancelled);
        assert!(report.mailboxes.is_empty());
    }

    #[test]
    fn test_fatal_index_skips_only_that_mailbox() {
        let fx = fixture();
        fs::write(fx.store.join("Archive.mbox").join("Index.plist"), b"broken").unwrap();

        let report = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store))
            .migrate(&MigrationTarget::new(&fx.profile, "Imported"))
            .unwrap();
        assert_eq!(report.mailboxes.len(), 1);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::FatalIndex);
        assert_eq!(report.issues[0].mailbox.as_deref(), Some("Archive"));
    }

    #[test]
    fn test_run_level_failures() {
        let fx = fixture();
        let missing = MigrationOrchestrator::new(MigrationRequest::new(
            SourceKind::Export,
            fx.store.join("nope"),
        ));
        assert!(matches!(missing.scan(), Err(MigrationError::SourceNotFound(_))));

        let empty = fx.profile.join("empty");
        fs::create_dir_all(&empty).unwrap();
        let nothing = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Export, &empty));
        assert!(matches!(nothing.scan(), Err(MigrationError::NothingDiscovered(_))));

        let orchestrator = MigrationOrchestrator::new(MigrationRequest::new(SourceKind::Store, &fx.store));
        assert!(matches!(
            orchestrator.migrate(&MigrationTarget::new(fx.store.join("no-profile"), "Imported")),
            Err(MigrationError::ProfileNotFound(_))
        ));
        assert!(matches!(
            orchestrator.migrate(&MigrationTarget::new(&fx.profile, "/abs/Imported")),
            Err(MigrationError::InvalidTarget(_))
        ));
    }
}
