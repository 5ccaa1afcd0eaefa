//! Exported Apple Mail `.mbox` bundles
//!
//! An export is a tree of `<Name>.mbox` directories, each holding its
//! envelopes in `Messages/`. Older exports carry a plain `mbox` file instead.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{
    collect_envelopes, is_mbox_dir_name, mbox_stem, skipped_symlink, Discovery, EnvelopeFile,
    EnvelopeListing, FileNameParts, MailSource, Mailbox, NameSegment, SourceKind, MESSAGES_DIR,
};
use crate::error::DiscoveryError;
use crate::thunderbird::MboxReader;

/// Name of the single-file fallback inside a bundle
pub const MBOX_FILE: &str = "mbox";

static EXPORT_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*?(\d+)(\.partial)?\.emlx$").unwrap());

/// Parse an export envelope name; the UID is the trailing digit run of the stem
pub fn parse_export_file_name(name: &str) -> Option<FileNameParts> {
    let caps = EXPORT_FILE_NAME.captures(name)?;
    let uid = caps.get(1)?.as_str().parse().ok()?;
    Some(FileNameParts {
        uid,
        partial: caps.get(2).is_some(),
    })
}

/// Model of an exported mailbox bundle tree
#[derive(Debug, Default, Clone, Copy)]
pub struct ExportModel;

impl ExportModel {
    pub fn new() -> Self {
        Self
    }

    fn read_mbox_fallback(&self, mailbox: &Mailbox) -> Result<EnvelopeListing, DiscoveryError> {
        let path = mailbox.directory.join(MBOX_FILE);
        let messages = MboxReader::read_file(&path)
            .map_err(|e| DiscoveryError::unreadable(&path, e.to_string()))?;

        debug!(
            "Read {} messages from mbox fallback of '{}'",
            messages.len(),
            mailbox.display_path
        );

        let envelopes: BTreeMap<String, EnvelopeFile> = messages
            .into_iter()
            .enumerate()
            .map(|(position, message)| {
                let envelope = EnvelopeFile::synthetic(path.clone(), position as u64 + 1, message.payload);
                (envelope.file_name.clone(), envelope)
            })
            .collect();

        Ok(EnvelopeListing {
            envelopes,
            skipped_files: 0,
        })
    }
}

impl MailSource for ExportModel {
    fn kind(&self) -> SourceKind {
        SourceKind::Export
    }

    fn discover(&self, root: &Path) -> Result<Discovery, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
        }

        let root_segment = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|name| is_mbox_dir_name(name))
            .map(|_| NameSegment::mailbox(mbox_stem(root)));

        let mut discovery = Discovery::default();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                (entry.file_type().is_dir() || is_nested_link(entry))
                    && entry.file_name() != MESSAGES_DIR
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Export walk error under {}: {}", root.display(), e);
                    discovery.errors.push(DiscoveryError::from_walk(e, root));
                    continue;
                }
            };
            if is_nested_link(&entry) {
                if let Some(e) = skipped_symlink(entry.path()) {
                    warn!("Export subtree skipped: {}", e);
                    discovery.errors.push(e);
                }
                continue;
            }
            if !is_mbox_dir_name(&entry.file_name().to_string_lossy()) {
                continue;
            }

            let mut segments: Vec<NameSegment> = Vec::new();
            if let Some(segment) = &root_segment {
                segments.push(segment.clone());
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                segments.extend(
                    relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .filter(|name| is_mbox_dir_name(name))
                        .map(|name| NameSegment::mailbox(name.trim_end_matches(".mbox"))),
                );
            }
            if segments.is_empty() {
                continue;
            }

            discovery.mailboxes.push(Mailbox::new(
                entry.path().to_path_buf(),
                segments,
                SourceKind::Export,
            ));
        }

        discovery.sort();
        info!(
            "Discovered {} export mailboxes under {}",
            discovery.mailboxes.len(),
            root.display()
        );
        Ok(discovery)
    }

    fn list_envelopes(&self, mailbox: &Mailbox) -> Result<EnvelopeListing, DiscoveryError> {
        if mailbox.directory.join(MESSAGES_DIR).is_dir() {
            return collect_envelopes(mailbox, parse_export_file_name);
        }
        if mailbox.directory.join(MBOX_FILE).is_file() {
            return self.read_mbox_fallback(mailbox);
        }
        Ok(EnvelopeListing::default())
    }
}

/// A symbolic link below the root; a linked root is still walked
fn is_nested_link(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.path_is_symlink()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emlx::codec::test_support::encode;
    use std::fs;
    use tempfile::TempDir;

    fn write_export_envelope(mailbox_dir: &Path, name: &str, bytes: &[u8]) {
        let messages = mailbox_dir.join(MESSAGES_DIR);
        fs::create_dir_all(&messages).unwrap();
        fs::write(messages.join(name), bytes).unwrap();
    }

    #[test]
    fn test_export_file_name_grammar() {
        assert_eq!(
            parse_export_file_name("message-12.emlx"),
            Some(FileNameParts { uid: 12, partial: false })
        );
        assert_eq!(
            parse_export_file_name("7.partial.emlx"),
            Some(FileNameParts { uid: 7, partial: true })
        );
        assert_eq!(parse_export_file_name("readme.emlx"), None);
    }

    #[test]
    fn test_discover_nested_bundles() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Export");
        fs::create_dir_all(root.join("Inbox.mbox/Archive.mbox")).unwrap();
        fs::create_dir_all(root.join("folder/Sent.mbox")).unwrap();
        write_export_envelope(&root.join("Inbox.mbox"), "1.emlx", &encode(b"Subject: a\n\n", None));

        let discovery = ExportModel::new().discover(&root).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Inbox", "Inbox/Archive", "Sent"]);
    }

    #[test]
    fn test_discover_root_bundle() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Inbox.mbox");
        fs::create_dir_all(root.join("Child.mbox")).unwrap();

        let discovery = ExportModel::new().discover(&root).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Inbox", "Inbox/Child"]);
    }

    #[test]
    fn test_list_envelopes_lenient_names() {
        let temp = TempDir::new().unwrap();
        let mbox = temp.path().join("Inbox.mbox");
        let message = b"From: a@example.com\nSubject: x\n\nbody\n";
        write_export_envelope(&mbox, "message-12.emlx", &encode(message, None));
        write_export_envelope(&mbox, "13.partial.emlx", &encode(message, None));

        let model = ExportModel::new();
        let discovery = model.discover(temp.path()).unwrap();
        let listing = model.list_envelopes(&discovery.mailboxes[0]).unwrap();

        assert_eq!(listing.len(), 2);
        assert_eq!(listing.envelopes["message-12.emlx"].uid, 12);
        assert!(listing.envelopes["message-12.emlx"].is_complete());
        assert!(!listing.envelopes["13.partial.emlx"].is_complete());
    }

    #[test]
    fn test_mbox_fallback_positional_uids() {
        let temp = TempDir::new().unwrap();
        let mbox = temp.path().join("Old.mbox");
        fs::create_dir_all(&mbox).unwrap();
        fs::write(
            mbox.join(MBOX_FILE),
            b"From a@example.com Mon Jan  1 00:00:00 2001\nSubject: one\n\n>From the start\n\n\
From b@example.com Mon Jan  1 00:00:00 2001\nSubject: two\n\nbody\n\n",
        )
        .unwrap();

        let model = ExportModel::new();
        let discovery = model.discover(temp.path()).unwrap();
        let listing = model.list_envelopes(&discovery.mailboxes[0]).unwrap();

        let uids: Vec<u64> = listing.values().map(|e| e.uid).collect();
        assert_eq!(uids, vec![1, 2]);
        assert!(listing.values().all(EnvelopeFile::is_complete));
        let first = &listing.envelopes["1.emlx"].envelope.message;
        assert!(first.windows(15).any(|w| w == b"\nFrom the start"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_bundles_are_reported_not_followed() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Export");
        write_export_envelope(&root.join("Inbox.mbox"), "1.emlx", &encode(b"Subject: a\n\n", None));
        let elsewhere = temp.path().join("Elsewhere.mbox");
        fs::create_dir_all(&elsewhere).unwrap();
        symlink("..", root.join("Loop.mbox")).unwrap();
        symlink(&elsewhere, root.join("Linked.mbox")).unwrap();

        let discovery = ExportModel::new().discover(&root).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Inbox"]);

        assert_eq!(discovery.errors.len(), 2);
        assert!(discovery
            .errors
            .iter()
            .any(|e| matches!(e, DiscoveryError::Loop(path) if path.ends_with("Loop.mbox"))));
        assert!(discovery.errors.iter().any(|e| matches!(
            e,
            DiscoveryError::Unreadable { path, .. } if path.ends_with("Linked.mbox")
        )));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_messages_dir_fails_only_its_mailbox() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let message = encode(b"Subject: a\n\n", None);
        write_export_envelope(&temp.path().join("Inbox.mbox"), "1.emlx", &message);
        write_export_envelope(&temp.path().join("Locked.mbox"), "1.emlx", &message);
        let locked = temp.path().join("Locked.mbox").join(MESSAGES_DIR);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Permission bits do not bind this user
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let model = ExportModel::new();
        let discovery = model.discover(temp.path()).unwrap();
        assert_eq!(discovery.mailboxes.len(), 2);
        let results: Vec<_> = discovery
            .mailboxes
            .iter()
            .map(|mailbox| (mailbox.display_path.clone(), model.list_envelopes(mailbox)))
            .collect();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(results[0].0, "Inbox");
        assert_eq!(results[0].1.as_ref().unwrap().len(), 1);
        assert_eq!(results[1].0, "Locked");
        assert!(matches!(
            &results[1].1,
            Err(DiscoveryError::Unreadable { path, .. }) if path.starts_with(&locked)
        ));
    }
}
