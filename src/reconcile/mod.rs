//! Index versus disk reconciliation
//!
//! Read-only comparison of a mailbox's index entries with the envelope files
//! actually present. Runs standalone as a diagnostic scan and as the first
//! step of every migration.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::index::IndexEntry;
use crate::source::{EnvelopeFile, EnvelopeListing, Mailbox};

/// Per-category message counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationCounts {
    pub indexed: usize,
    pub stored_complete: usize,
    pub stored_partial: usize,
    pub missing: usize,
    pub unindexed: usize,
}

impl ReconciliationCounts {
    pub fn add(&mut self, other: &ReconciliationCounts) {
        self.indexed += other.indexed;
        self.stored_complete += other.stored_complete;
        self.stored_partial += other.stored_partial;
        self.missing += other.missing;
        self.unindexed += other.unindexed;
    }
}

/// Reconciliation outcome for one mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub mailbox: String,
    pub index_present: bool,
    /// Index entries dropped because their UID was already listed
    pub duplicate_index_entries: usize,
    pub counts: ReconciliationCounts,
    pub complete_uids: Vec<u64>,
    pub partial_uids: Vec<u64>,
    pub missing_uids: Vec<u64>,
    pub unindexed_uids: Vec<u64>,
}

impl ReconciliationReport {
    /// Whether the mailbox has anything worth a second look
    pub fn has_discrepancies(&self) -> bool {
        self.counts.stored_partial > 0 || self.counts.missing > 0 || self.counts.unindexed > 0
    }
}

/// Index entries paired with the envelope file each one resolves to
#[derive(Debug)]
pub struct Reconciliation<'a> {
    pub report: ReconciliationReport,
    /// Deduplicated entries in index order with their envelope, if any
    pub indexed: Vec<(&'a IndexEntry, Option<&'a EnvelopeFile>)>,
    /// Envelopes whose UID no entry mentions
    pub unindexed: Vec<&'a EnvelopeFile>,
}

pub struct Reconciler;

impl Reconciler {
    /// Compare `entries` with `listing`; `None` entries means no index exists
    pub fn reconcile(
        mailbox: &Mailbox,
        entries: Option<&[IndexEntry]>,
        listing: &EnvelopeListing,
    ) -> ReconciliationReport {
        Self::pair(mailbox, entries, listing).report
    }

    /// Like [`Reconciler::reconcile`] but keeps the entry to envelope pairing
    pub fn pair<'a>(
        mailbox: &Mailbox,
        entries: Option<&'a [IndexEntry]>,
        listing: &'a EnvelopeListing,
    ) -> Reconciliation<'a> {
        let mut report = ReconciliationReport {
            mailbox: mailbox.display_path.clone(),
            index_present: entries.is_some(),
            ..Default::default()
        };

        let mut by_uid: HashMap<u64, Vec<&EnvelopeFile>> = HashMap::new();
        for envelope in listing.values() {
            by_uid.entry(envelope.uid).or_default().push(envelope);
        }

        let mut seen_uids: HashSet<u64> = HashSet::new();
        let mut used_files: HashSet<&str> = HashSet::new();
        let mut indexed = Vec::new();

        for entry in entries.unwrap_or_default() {
            if !seen_uids.insert(entry.uid) {
                report.duplicate_index_entries += 1;
                continue;
            }

            let found = by_uid
                .get(&entry.uid)
                .and_then(|files| {
                    files
                        .iter()
                        .find(|f| f.is_complete())
                        .or_else(|| files.first())
                        .copied()
                })
                .or_else(|| listing.envelopes.get(&entry.file_name));

            match found {
                Some(envelope) if envelope.is_complete() => {
                    report.complete_uids.push(entry.uid)
                }
                Some(_) => report.partial_uids.push(entry.uid),
                None => report.missing_uids.push(entry.uid),
            }
            if let Some(envelope) = found {
                used_files.insert(envelope.file_name.as_str());
            }
            indexed.push((entry, found));
        }

        let unindexed: Vec<&EnvelopeFile> = listing
            .values()
            .filter(|envelope| {
                !seen_uids.contains(&envelope.uid)
                    && !used_files.contains(envelope.file_name.as_str())
            })
            .collect();
        report.unindexed_uids = unindexed.iter().map(|e| e.uid).collect();

        report.counts = ReconciliationCounts {
            indexed: indexed.len(),
            stored_complete: report.complete_uids.len(),
            stored_partial: report.partial_uids.len(),
            missing: report.missing_uids.len(),
            unindexed: report.unindexed_uids.len(),
        };

        debug!(
            "Reconciled '{}': {:?} ({} duplicate entries)",
            report.mailbox, report.counts, report.duplicate_index_entries
        );

        Reconciliation {
            report,
            indexed,
            unindexed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emlx::{Envelope, EnvelopeMetadata};
    use crate::source::SourceKind;
    use std::path::PathBuf;

    fn mailbox() -> Mailbox {
        Mailbox::new(
            PathBuf::from("/store/Inbox.mbox"),
            vec![crate::source::NameSegment::mailbox("Inbox")],
            SourceKind::Store,
        )
    }

    fn envelope(name: &str, uid: u64, partial_by_name: bool, content_complete: bool) -> EnvelopeFile {
        EnvelopeFile {
            path: PathBuf::from("/store/Inbox.mbox/Messages").join(name),
            file_name: name.to_string(),
            uid,
            partial_by_name,
            envelope: Envelope {
                declared_len: 10,
                message: b"Subject: x".to_vec(),
                content_complete,
                metadata: EnvelopeMetadata::default(),
            },
            modified: None,
        }
    }

    fn listing(files: Vec<EnvelopeFile>) -> EnvelopeListing {
        EnvelopeListing {
            envelopes: files.into_iter().map(|f| (f.file_name.clone(), f)).collect(),
            skipped_files: 0,
        }
    }

    fn assert_sum_invariant(report: &ReconciliationReport) {
        let c = report.counts;
        assert_eq!(c.stored_complete + c.stored_partial + c.missing, c.indexed);
    }

    #[test]
    fn test_three_indexed_two_present_one_missing() {
        let entries = vec![IndexEntry::new(1), IndexEntry::new(2), IndexEntry::new(3)];
        let files = listing(vec![
            envelope("1.emlx", 1, false, true),
            envelope("2.emlx", 2, false, true),
        ]);

        let report = Reconciler::reconcile(&mailbox(), Some(entries.as_slice()), &files);
        assert_eq!(report.counts.stored_complete, 2);
        assert_eq!(report.counts.stored_partial, 0);
        assert_eq!(report.counts.missing, 1);
        assert_eq!(report.missing_uids, vec![3]);
        assert_sum_invariant(&report);
    }

    #[test]
    fn test_partial_by_name_and_by_content() {
        let entries = vec![IndexEntry::new(1), IndexEntry::new(2), IndexEntry::new(3)];
        let files = listing(vec![
            envelope("1.partial.emlx", 1, true, true),
            envelope("2.emlx", 2, false, false),
            envelope("3.emlx", 3, false, true),
            envelope("9.emlx", 9, false, true),
        ]);

        let report = Reconciler::reconcile(&mailbox(), Some(entries.as_slice()), &files);
        assert_eq!(report.partial_uids, vec![1, 2]);
        assert_eq!(report.complete_uids, vec![3]);
        assert_eq!(report.unindexed_uids, vec![9]);
        assert!(report.has_discrepancies());
        assert_sum_invariant(&report);
    }

    #[test]
    fn test_complete_sibling_preferred_over_partial() {
        let entries = vec![IndexEntry::new(5)];
        let files = listing(vec![
            envelope("5.emlx", 5, false, true),
            envelope("5.partial.emlx", 5, true, true),
        ]);

        let reconciliation = Reconciler::pair(&mailbox(), Some(entries.as_slice()), &files);
        assert_eq!(reconciliation.report.complete_uids, vec![5]);
        assert!(reconciliation.unindexed.is_empty());
        assert_eq!(reconciliation.indexed[0].1.unwrap().file_name, "5.emlx");
    }

    #[test]
    fn test_match_by_file_name_and_duplicates() {
        let mut entry = IndexEntry::new(70);
        entry.file_name = "message-7.emlx".to_string();
        let entries = vec![entry, IndexEntry::new(70)];
        let files = listing(vec![envelope("message-7.emlx", 7, false, true)]);

        let report = Reconciler::reconcile(&mailbox(), Some(entries.as_slice()), &files);
        assert_eq!(report.duplicate_index_entries, 1);
        assert_eq!(report.counts.indexed, 1);
        assert_eq!(report.complete_uids, vec![70]);
        assert!(report.unindexed_uids.is_empty());
        assert_sum_invariant(&report);
    }

    #[test]
    fn test_no_index_makes_everything_unindexed() {
        let files = listing(vec![envelope("1.emlx", 1, false, true)]);
        let report = Reconciler::reconcile(&mailbox(), None, &files);
        assert!(!report.index_present);
        assert_eq!(report.counts.indexed, 0);
        assert_eq!(report.counts.unindexed, 1);
    }
}
