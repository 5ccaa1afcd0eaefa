//! Source models over Apple Mail trees
//!
//! Both the live Mail store and exported `.mbox` bundles expose the same
//! contract: discover mailboxes, list the envelope files of one mailbox, and
//! read its index.

pub mod export;
pub mod store;

pub use export::ExportModel;
pub use store::StoreModel;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::emlx::{Envelope, EnvelopeCodec};
use crate::error::{DiscoveryError, FormatError, FormatResult};
use crate::index::{IndexCodec, IndexEntry, INDEX_FILE_NAMES};

/// Directory holding envelope files inside a mailbox
pub const MESSAGES_DIR: &str = "Messages";

/// Which kind of tree a mailbox was discovered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Store,
    Export,
}

/// One component of a mailbox's hierarchical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameSegment {
    pub name: String,
    /// Account directory rather than a mailbox
    pub is_account: bool,
}

impl NameSegment {
    pub fn mailbox<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            is_account: false,
        }
    }

    pub fn account<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            is_account: true,
        }
    }
}

/// A discovered mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    /// Segments joined with `/`, e.g. `Inbox/Archive`
    pub display_path: String,
    pub segments: Vec<NameSegment>,
    pub directory: PathBuf,
    pub kind: SourceKind,
}

impl Mailbox {
    pub fn new(directory: PathBuf, segments: Vec<NameSegment>, kind: SourceKind) -> Self {
        let display_path = segments
            .iter()
            .map(|segment| segment.name.as_str())
            .collect::<Vec<_>>()
            .join("/");
        Self {
            display_path,
            segments,
            directory,
            kind,
        }
    }

    pub fn segment_names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.name.clone()).collect()
    }

    /// Whether the display path starts with `prefix`
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.display_path.starts_with(prefix)
    }
}

/// Mailboxes found under a root plus the subtrees that could not be read
#[derive(Debug, Default)]
pub struct Discovery {
    pub mailboxes: Vec<Mailbox>,
    pub errors: Vec<DiscoveryError>,
}

impl Discovery {
    pub(crate) fn sort(&mut self) {
        self.mailboxes
            .sort_by_key(|mailbox| mailbox.display_path.to_lowercase());
    }
}

/// A decoded envelope file on disk
#[derive(Debug, Clone)]
pub struct EnvelopeFile {
    pub path: PathBuf,
    pub file_name: String,
    pub uid: u64,
    /// File name carries the `.partial` marker
    pub partial_by_name: bool,
    pub envelope: Envelope,
    pub modified: Option<SystemTime>,
}

impl EnvelopeFile {
    /// Complete only when not named `.partial` and all declared bytes exist
    pub fn is_complete(&self) -> bool {
        !self.partial_by_name && self.envelope.content_complete
    }

    /// Envelope built from a message that has no file of its own
    pub fn synthetic(path: PathBuf, uid: u64, message: Vec<u8>) -> Self {
        Self {
            path,
            file_name: format!("{}.emlx", uid),
            uid,
            partial_by_name: false,
            envelope: Envelope {
                declared_len: message.len(),
                message,
                content_complete: true,
                metadata: Default::default(),
            },
            modified: None,
        }
    }
}

/// Envelope files of one mailbox keyed by file name
#[derive(Debug, Default)]
pub struct EnvelopeListing {
    pub envelopes: BTreeMap<String, EnvelopeFile>,
    /// `.emlx` files that did not match the grammar or failed to decode
    pub skipped_files: usize,
}

impl EnvelopeListing {
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &EnvelopeFile> {
        self.envelopes.values()
    }
}

/// Parsed envelope file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileNameParts {
    pub uid: u64,
    pub partial: bool,
}

/// Contract shared by the store and export models
pub trait MailSource {
    fn kind(&self) -> SourceKind;

    /// Find every mailbox beneath `root`
    fn discover(&self, root: &Path) -> Result<Discovery, DiscoveryError>;

    /// Decode every envelope file that belongs to `mailbox`
    fn list_envelopes(&self, mailbox: &Mailbox) -> Result<EnvelopeListing, DiscoveryError>;

    /// Read the mailbox index; `None` when the mailbox has none
    fn read_index(&self, mailbox: &Mailbox) -> FormatResult<Option<Vec<IndexEntry>>> {
        read_mailbox_index(&mailbox.directory)
    }
}

/// Look up and decode the index file of a mailbox directory
pub fn read_mailbox_index(directory: &Path) -> FormatResult<Option<Vec<IndexEntry>>> {
    for name in INDEX_FILE_NAMES {
        let path = directory.join(name);
        if !path.is_file() {
            continue;
        }

        let raw = fs::read(&path)?;
        match IndexCodec::decode(&raw) {
            Ok(entries) => {
                debug!("Read {} index entries from {}", entries.len(), path.display());
                return Ok(Some(entries));
            }
            Err(FormatError::LegacyTableOfContents { message_count }) => {
                warn!(
                    "Ignoring legacy table of contents at {} ({} messages, no UIDs)",
                    path.display(),
                    message_count
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Display name of a `.mbox` directory without the extension
pub(crate) fn mbox_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".mbox").unwrap_or(&name).to_string()
}

pub(crate) fn is_mbox_dir_name(name: &str) -> bool {
    name.ends_with(".mbox")
}

/// Discovery error for a symbolic link found among a directory's children.
///
/// Links are never followed. One that resolves to a directory is reported,
/// as a loop when it points at one of its own ancestors. Links to files and
/// dangling links yield `None`.
pub(crate) fn skipped_symlink(path: &Path) -> Option<DiscoveryError> {
    let target = match fs::canonicalize(path) {
        Ok(target) => target,
        Err(e) => {
            debug!("Ignoring dangling link {}: {}", path.display(), e);
            return None;
        }
    };
    if !target.is_dir() {
        return None;
    }

    let points_at_ancestor = path
        .parent()
        .and_then(|parent| fs::canonicalize(parent).ok())
        .map_or(false, |parent| parent.starts_with(&target));
    if points_at_ancestor {
        Some(DiscoveryError::Loop(path.to_path_buf()))
    } else {
        Some(DiscoveryError::unreadable(
            path,
            format!("symbolic link to {} not followed", target.display()),
        ))
    }
}

/// Envelope file located on disk but not yet decoded
#[derive(Debug, Clone)]
pub struct EnvelopePath {
    pub path: PathBuf,
    pub file_name: String,
    pub parts: FileNameParts,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Envelope files of one mailbox that live under a `Messages` directory.
///
/// Nested `.mbox` directories belong to other mailboxes and are not entered.
/// Names rejected by `parse_name` are counted in the second return value.
pub(crate) fn envelope_paths(
    mailbox: &Mailbox,
    parse_name: fn(&str) -> Option<FileNameParts>,
) -> Result<(Vec<EnvelopePath>, usize), DiscoveryError> {
    let root = &mailbox.directory;
    let mut paths = Vec::new();
    let mut rejected = 0;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && is_mbox_dir_name(&entry.file_name().to_string_lossy()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| DiscoveryError::from_walk(e, root))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(".emlx") {
            continue;
        }
        let in_messages_dir = entry
            .path()
            .strip_prefix(root)
            .map(|rel| rel.components().any(|c| c.as_os_str() == MESSAGES_DIR))
            .unwrap_or(false);
        if !in_messages_dir {
            continue;
        }

        let Some(parts) = parse_name(&file_name) else {
            warn!("Skipping envelope with unexpected name: {}", entry.path().display());
            rejected += 1;
            continue;
        };

        let metadata = entry.metadata().ok();
        paths.push(EnvelopePath {
            path: entry.path().to_path_buf(),
            file_name,
            parts,
            len: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            modified: metadata.and_then(|m| m.modified().ok()),
        });
    }

    Ok((paths, rejected))
}

/// Decode every envelope of a mailbox
pub(crate) fn collect_envelopes(
    mailbox: &Mailbox,
    parse_name: fn(&str) -> Option<FileNameParts>,
) -> Result<EnvelopeListing, DiscoveryError> {
    let (paths, rejected) = envelope_paths(mailbox, parse_name)?;
    let mut listing = EnvelopeListing {
        skipped_files: rejected,
        ..Default::default()
    };

    for located in paths {
        let envelope = match EnvelopeCodec::read_file(&located.path) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Skipping undecodable envelope {}: {}", located.path.display(), e);
                listing.skipped_files += 1;
                continue;
            }
        };

        if listing.envelopes.contains_key(&located.file_name) {
            warn!(
                "Duplicate envelope name {} in mailbox '{}', keeping the first",
                located.file_name, mailbox.display_path
            );
            listing.skipped_files += 1;
            continue;
        }

        listing.envelopes.insert(
            located.file_name.clone(),
            EnvelopeFile {
                path: located.path,
                file_name: located.file_name,
                uid: located.parts.uid,
                partial_by_name: located.parts.partial,
                envelope,
                modified: located.modified,
            },
        );
    }

    debug!(
        "Mailbox '{}': {} envelopes, {} skipped",
        mailbox.display_path,
        listing.len(),
        listing.skipped_files
    );
    Ok(listing)
}
