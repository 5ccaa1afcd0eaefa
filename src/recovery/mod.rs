//! Partial message recovery
//!
//! A [`RecoveryIndex`] is built once per run from one or more store roots. It
//! records every complete envelope by UID and by composite message key so
//! that partial or missing messages can be matched against a fuller copy
//! without rescanning the tree for each message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::emlx::{EnvelopeCodec, HeaderBlock, MessageKey};
use crate::error::DiscoveryError;
use crate::index::IndexEntry;
use crate::source::{EnvelopeFile, MailSource, StoreModel};
use crate::thunderbird::StatusFlags;

/// Header marking a synthesised placeholder
pub const RECOVERY_HEADER: &str = "X-Mail-Migration-Recovery";

/// Headers that describe the original body and are dropped from placeholders
const BODY_HEADERS: [&str; 4] = [
    "Content-Type",
    "Content-Transfer-Encoding",
    "Content-Disposition",
    "MIME-Version",
];

/// How a message's payload was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Complete,
    Recovered,
    Unrecoverable,
}

/// Where a resolved payload came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoverySource {
    Original,
    Placeholder,
    SecondaryCopy { path: PathBuf },
}

/// A message ready for the writer, or a reported loss
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMessage {
    pub uid: u64,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub status: StatusFlags,
    pub provenance: Provenance,
    pub source: RecoverySource,
}

impl ResolvedMessage {
    /// A complete envelope passed through unchanged. The payload is moved,
    /// not copied.
    pub fn complete(envelope: EnvelopeFile, entry: Option<&IndexEntry>) -> Self {
        let flags = envelope
            .envelope
            .metadata
            .flags
            .or_else(|| entry.and_then(|e| e.flags));
        Self {
            uid: envelope.uid,
            payload: envelope.envelope.message,
            status: flags.map(StatusFlags::from_apple).unwrap_or_default(),
            provenance: Provenance::Complete,
            source: RecoverySource::Original,
        }
    }

    pub fn unrecoverable(uid: u64, status: StatusFlags) -> Self {
        Self {
            uid,
            payload: Vec::new(),
            status,
            provenance: Provenance::Unrecoverable,
            source: RecoverySource::Original,
        }
    }

    /// Whether the writer may append this message
    pub fn is_writable(&self) -> bool {
        self.provenance != Provenance::Unrecoverable && !self.payload.is_empty()
    }
}

/// A complete envelope known to the recovery index
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub uid: u64,
    pub mailbox: String,
    pub declared_len: usize,
    pub modified: Option<SystemTime>,
    /// Found under the run's own source root
    pub primary: bool,
}

impl Candidate {
    /// Largest declared length, then newest modification time, then path
    fn preference(&self, other: &Candidate) -> Ordering {
        other
            .declared_len
            .cmp(&self.declared_len)
            .then_with(|| other.modified.cmp(&self.modified))
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Complete envelopes of one or more store roots keyed by UID and message key
#[derive(Debug, Default)]
pub struct RecoveryIndex {
    candidates: Vec<Candidate>,
    by_uid: HashMap<u64, Vec<usize>>,
    by_key: HashMap<MessageKey, Vec<usize>>,
}

impl RecoveryIndex {
    /// Probe every envelope under `roots`. Unreadable parts are returned
    /// alongside the index; a root that fails entirely contributes nothing.
    pub fn build<P: AsRef<Path>>(roots: &[P]) -> (Self, Vec<DiscoveryError>) {
        Self::build_with_primary(None, roots)
    }

    /// Like [`RecoveryIndex::build`], with `primary` indexed first and its
    /// candidates marked as belonging to the run's own source. Those are
    /// offered to partials but never to missing index entries, since the
    /// run migrates them from their own mailbox anyway.
    pub fn build_with_primary<P: AsRef<Path>>(
        primary: Option<&Path>,
        roots: &[P],
    ) -> (Self, Vec<DiscoveryError>) {
        let model = StoreModel::new();
        let mut index = Self::default();
        let mut errors = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        if let Some(primary) = primary {
            index.index_root(&model, primary, true, &mut seen, &mut errors);
        }
        for root in roots {
            index.index_root(&model, root.as_ref(), false, &mut seen, &mut errors);
        }

        info!(
            "Recovery index holds {} complete envelopes ({} distinct UIDs)",
            index.len(),
            index.by_uid.len()
        );
        (index, errors)
    }

    fn index_root(
        &mut self,
        model: &StoreModel,
        root: &Path,
        primary: bool,
        seen: &mut HashSet<PathBuf>,
        errors: &mut Vec<DiscoveryError>,
    ) {
        let discovery = match model.discover(root) {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!("Recovery root {} skipped: {}", root.display(), e);
                errors.push(e);
                return;
            }
        };
        errors.extend(discovery.errors);

        for mailbox in &discovery.mailboxes {
            let paths = match model.envelope_paths(mailbox) {
                Ok(paths) => paths,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            for located in paths {
                if located.parts.partial || !seen.insert(located.path.clone()) {
                    continue;
                }
                let probe = match EnvelopeCodec::probe_file(&located.path) {
                    Ok(probe) => probe,
                    Err(e) => {
                        debug!("Not indexing {}: {}", located.path.display(), e);
                        continue;
                    }
                };
                if !probe.fits_in(located.len) {
                    continue;
                }

                self.insert(
                    Candidate {
                        path: located.path,
                        uid: located.parts.uid,
                        mailbox: mailbox.display_path.clone(),
                        declared_len: probe.declared_len,
                        modified: located.modified,
                        primary,
                    },
                    probe.headers.message_key(),
                );
            }
        }
    }

    pub fn insert(&mut self, candidate: Candidate, key: Option<MessageKey>) {
        let slot = self.candidates.len();
        self.by_uid.entry(candidate.uid).or_default().push(slot);
        if let Some(key) = key {
            self.by_key.entry(key).or_default().push(slot);
        }
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Complete candidates with `uid`, best first
    pub fn candidates_for_uid(&self, uid: u64) -> Vec<&Candidate> {
        self.ranked(self.by_uid.get(&uid))
    }

    /// Complete candidates sharing `key`, best first
    pub fn candidates_for_key(&self, key: &MessageKey) -> Vec<&Candidate> {
        self.ranked(self.by_key.get(key))
    }

    /// Whether a complete copy exists for `uid` or, failing that, `key`
    pub fn has_candidate(&self, uid: u64, key: Option<&MessageKey>) -> bool {
        self.by_uid.contains_key(&uid) || key.map_or(false, |key| self.by_key.contains_key(key))
    }

    /// Copies sharing a message key beyond the first one
    pub fn duplicate_stats(&self) -> DuplicateStats {
        let mut stats = DuplicateStats::default();
        for slots in self.by_key.values() {
            if slots.len() < 2 {
                continue;
            }
            stats.duplicate_keys += 1;
            stats.duplicate_messages += slots.len() - 1;
            let first = self.candidates[slots[0]].declared_len;
            if slots.iter().any(|&slot| self.candidates[slot].declared_len != first) {
                stats.mismatched_size_keys += 1;
            }
        }
        stats
    }

    fn ranked(&self, slots: Option<&Vec<usize>>) -> Vec<&Candidate> {
        let mut found: Vec<&Candidate> = slots
            .map(|slots| slots.iter().map(|&slot| &self.candidates[slot]).collect())
            .unwrap_or_default();
        found.sort_by(|a, b| a.preference(b));
        found
    }
}

/// Duplicate copies among the indexed complete envelopes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateStats {
    /// Message keys with more than one complete copy
    pub duplicate_keys: usize,
    /// Extra copies summed over those keys
    pub duplicate_messages: usize,
    /// Keys whose copies disagree on the declared length
    pub mismatched_size_keys: usize,
}

/// Resolves partial and missing messages against an optional recovery index
pub struct PartialResolver<'a> {
    index: Option<&'a RecoveryIndex>,
}

impl<'a> PartialResolver<'a> {
    pub fn new(index: Option<&'a RecoveryIndex>) -> Self {
        Self { index }
    }

    /// Resolve a partial envelope.
    ///
    /// A complete copy from the index wins; otherwise a placeholder is built
    /// when enough header information survives, and failing that the message
    /// is unrecoverable.
    pub fn resolve(&self, partial: &EnvelopeFile, entry: Option<&IndexEntry>) -> ResolvedMessage {
        let own_flags = partial
            .envelope
            .metadata
            .flags
            .or_else(|| entry.and_then(|e| e.flags));
        let headers = partial.envelope.headers();

        let mut candidates = self.candidates_for_uid(partial.uid);
        if candidates.is_empty() {
            if let (Some(index), Some(key)) = (self.index, headers.message_key()) {
                candidates = index.candidates_for_key(&key);
            }
        }

        if let Some(resolved) = self.first_complete(partial.uid, &candidates, own_flags) {
            debug!(
                "UID {} recovered from {:?}",
                partial.uid, resolved.source
            );
            return resolved;
        }

        let status = own_flags.map(StatusFlags::from_apple).unwrap_or_default();
        match placeholder(partial, &headers, entry) {
            Some(payload) => {
                debug!("UID {} replaced by a placeholder", partial.uid);
                ResolvedMessage {
                    uid: partial.uid,
                    payload,
                    status,
                    provenance: Provenance::Recovered,
                    source: RecoverySource::Placeholder,
                }
            }
            None => {
                warn!("UID {} at {} is unrecoverable", partial.uid, partial.path.display());
                ResolvedMessage::unrecoverable(partial.uid, status)
            }
        }
    }

    /// Look for a complete copy of an indexed UID that has no file. Copies
    /// under the run's own source root are skipped: they get migrated from
    /// the mailbox they live in.
    pub fn recover_missing(&self, entry: &IndexEntry) -> ResolvedMessage {
        let mut candidates = self.candidates_for_uid(entry.uid);
        candidates.retain(|candidate| !candidate.primary);
        self.first_complete(entry.uid, &candidates, entry.flags)
            .unwrap_or_else(|| {
                ResolvedMessage::unrecoverable(
                    entry.uid,
                    entry.flags.map(StatusFlags::from_apple).unwrap_or_default(),
                )
            })
    }

    fn candidates_for_uid(&self, uid: u64) -> Vec<&'a Candidate> {
        self.index
            .map(|index| index.candidates_for_uid(uid))
            .unwrap_or_default()
    }

    fn first_complete(
        &self,
        uid: u64,
        candidates: &[&Candidate],
        own_flags: Option<u64>,
    ) -> Option<ResolvedMessage> {
        candidates.iter().find_map(|candidate| {
            let envelope = match EnvelopeCodec::read_file(&candidate.path) {
                Ok(envelope) if envelope.content_complete => envelope,
                Ok(_) => return None,
                Err(e) => {
                    debug!("Candidate {} unusable: {}", candidate.path.display(), e);
                    return None;
                }
            };
            let flags = own_flags.or(envelope.metadata.flags);
            Some(ResolvedMessage {
                uid,
                payload: envelope.message,
                status: flags.map(StatusFlags::from_apple).unwrap_or_default(),
                provenance: Provenance::Recovered,
                source: RecoverySource::SecondaryCopy {
                    path: candidate.path.clone(),
                },
            })
        })
    }
}

/// Build a placeholder message when a sender plus a subject or date is known
fn placeholder(
    partial: &EnvelopeFile,
    headers: &HeaderBlock,
    entry: Option<&IndexEntry>,
) -> Option<Vec<u8>> {
    let metadata = &partial.envelope.metadata;

    let sender = metadata
        .sender
        .clone()
        .or_else(|| headers.get_non_empty("From").map(str::to_string))
        .or_else(|| entry.and_then(|e| e.sender.clone()))?;
    let subject = metadata
        .subject
        .clone()
        .or_else(|| headers.get_non_empty("Subject").map(str::to_string))
        .or_else(|| entry.and_then(|e| e.subject.clone()));
    let date: Option<DateTime<Utc>> = metadata
        .date_sent
        .or(metadata.date_received)
        .or_else(|| headers.date())
        .or_else(|| entry.and_then(|e| e.date));

    if subject.is_none() && date.is_none() {
        return None;
    }

    let mut out = String::new();
    for (name, value) in headers.iter() {
        let dropped = BODY_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
            || name.eq_ignore_ascii_case(RECOVERY_HEADER);
        if !dropped {
            out.push_str(&format!("{}: {}\n", name, value));
        }
    }
    if headers.get_non_empty("From").is_none() {
        out.push_str(&format!("From: {}\n", sender));
    }
    if headers.get_non_empty("To").is_none() && !metadata.to.is_empty() {
        out.push_str(&format!("To: {}\n", metadata.to.join(", ")));
    }
    if headers.get_non_empty("Subject").is_none() {
        if let Some(subject) = &subject {
            out.push_str(&format!("Subject: {}\n", subject));
        }
    }
    if headers.get_non_empty("Date").is_none() {
        if let Some(date) = date {
            out.push_str(&format!("Date: {}\n", date.to_rfc2822()));
        }
    }

    out.push_str(&format!("{}: placeholder\n", RECOVERY_HEADER));
    out.push_str("MIME-Version: 1.0\n");
    out.push_str("Content-Type: text/plain; charset=utf-8\n\n");
    out.push_str("The body of this message was never fully downloaded and no complete\n");
    out.push_str("copy was found during migration. Only its headers were preserved.\n\n");
    out.push_str(&format!("Original file: {}\n", partial.path.display()));
    out.push_str(&format!("Declared size: {} bytes\n", partial.envelope.declared_len));

    Some(out.into_bytes())
}
