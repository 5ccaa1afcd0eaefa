//! Apple Mail store model (`~/Library/Mail/V10` and below)
//!
//! Envelopes live at `<Name>.mbox/<UUID>/Data/<digits>/Messages/<uid>.emlx`.
//! The root may be the versioned store directory, an account directory, or a
//! single `.mbox` directory.

use once_cell::sync::Lazy;
use plist::Value;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    collect_envelopes, envelope_paths, is_mbox_dir_name, mbox_stem, skipped_symlink, Discovery,
    EnvelopeListing, EnvelopePath, FileNameParts, MailSource, Mailbox, NameSegment, SourceKind,
};
use crate::error::DiscoveryError;

/// Directories that are part of a mailbox's internals, never accounts
const SKIP_DIRECTORIES: [&str; 6] = [
    "Attachments",
    "Attachments.noindex",
    "Data",
    "Messages",
    "Resources",
    "MailData",
];

static STORE_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(\.partial)?\.emlx$").unwrap());

/// Parse a store envelope name such as `123.emlx` or `123.partial.emlx`
pub fn parse_store_file_name(name: &str) -> Option<FileNameParts> {
    let caps = STORE_FILE_NAME.captures(name)?;
    let uid = caps.get(1)?.as_str().parse().ok()?;
    Some(FileNameParts {
        uid,
        partial: caps.get(2).is_some(),
    })
}

/// Model of Apple Mail's on-disk store
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreModel;

impl StoreModel {
    pub fn new() -> Self {
        Self
    }

    /// Locate the envelope files of a mailbox without decoding them
    pub fn envelope_paths(&self, mailbox: &Mailbox) -> Result<Vec<EnvelopePath>, DiscoveryError> {
        envelope_paths(mailbox, parse_store_file_name).map(|(paths, _)| paths)
    }

    fn walk_children(
        &self,
        directory: &Path,
        parent: &[NameSegment],
        include_accounts: bool,
        discovery: &mut Discovery,
    ) {
        let ChildDirs {
            mut children,
            links,
        } = match read_child_dirs(directory) {
            Ok(found) => found,
            Err(e) => {
                warn!("Store subtree skipped: {}", e);
                discovery.errors.push(e);
                return;
            }
        };
        children.sort_by_key(|(name, _)| name.to_lowercase());

        for (name, path) in links {
            // Plain directories below a mailbox are its internals
            if !is_mbox_dir_name(&name) && !parent.is_empty() {
                continue;
            }
            if let Some(e) = skipped_symlink(&path) {
                warn!("Store subtree skipped: {}", e);
                discovery.errors.push(e);
            }
        }

        for (name, path) in children {
            if is_mbox_dir_name(&name) {
                let mut segments = parent.to_vec();
                segments.push(NameSegment::mailbox(mailbox_display_name(&path)));
                discovery.mailboxes.push(Mailbox::new(
                    path.clone(),
                    segments.clone(),
                    SourceKind::Store,
                ));
                self.walk_children(&path, &segments, include_accounts, discovery);
            } else {
                // Plain directories only matter above the first mailbox
                if !parent.is_empty() || SKIP_DIRECTORIES.contains(&name.as_str()) {
                    continue;
                }
                let mut segments = parent.to_vec();
                if include_accounts {
                    segments.push(NameSegment::account(name));
                }
                self.walk_children(&path, &segments, include_accounts, discovery);
            }
        }
    }
}

impl MailSource for StoreModel {
    fn kind(&self) -> SourceKind {
        SourceKind::Store
    }

    fn discover(&self, root: &Path) -> Result<Discovery, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
        }

        let mut discovery = Discovery::default();
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if is_mbox_dir_name(&root_name) {
            let segments = vec![NameSegment::mailbox(mailbox_display_name(root))];
            discovery.mailboxes.push(Mailbox::new(
                root.to_path_buf(),
                segments.clone(),
                SourceKind::Store,
            ));
            self.walk_children(root, &segments, false, &mut discovery);
        } else {
            let include_accounts = has_account_directories(root);
            debug!(
                "Store root {} {} account directories",
                root.display(),
                if include_accounts { "has" } else { "has no" }
            );
            self.walk_children(root, &[], include_accounts, &mut discovery);
        }

        discovery.sort();
        info!(
            "Discovered {} store mailboxes under {}",
            discovery.mailboxes.len(),
            root.display()
        );
        Ok(discovery)
    }

    fn list_envelopes(&self, mailbox: &Mailbox) -> Result<EnvelopeListing, DiscoveryError> {
        collect_envelopes(mailbox, parse_store_file_name)
    }
}

/// `MailboxName` from `Info.plist`, else the directory stem.
///
/// The name becomes a folder on disk, so one that is not a single plain path
/// component is ignored.
fn mailbox_display_name(directory: &Path) -> String {
    let info = directory.join("Info.plist");
    if info.is_file() {
        if let Ok(Value::Dictionary(dict)) = Value::from_file(&info) {
            if let Some(name) = dict
                .get("MailboxName")
                .and_then(Value::as_string)
                .map(str::trim)
                .filter(|name| !name.is_empty())
            {
                if is_plain_segment(name) {
                    return name.to_string();
                }
                warn!(
                    "Ignoring unsafe MailboxName {:?} in {}",
                    name,
                    info.display()
                );
            }
        }
    }
    mbox_stem(directory)
}

fn is_plain_segment(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Whether the root holds account directories beside or instead of mailboxes
fn has_account_directories(root: &Path) -> bool {
    read_child_dirs(root)
        .map(|found| {
            found.children.iter().any(|(name, _)| {
                !is_mbox_dir_name(name) && !SKIP_DIRECTORIES.contains(&name.as_str())
            })
        })
        .unwrap_or(false)
}

/// Children of a directory that discovery may descend into
struct ChildDirs {
    children: Vec<(String, PathBuf)>,
    /// Symbolic links, which are never entered
    links: Vec<(String, PathBuf)>,
}

fn read_child_dirs(directory: &Path) -> Result<ChildDirs, DiscoveryError> {
    let entries =
        fs::read_dir(directory).map_err(|e| DiscoveryError::unreadable(directory, e.to_string()))?;

    let mut found = ChildDirs {
        children: Vec::new(),
        links: Vec::new(),
    };
    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::unreadable(directory, e.to_string()))?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let child = (entry.file_name().to_string_lossy().into_owned(), entry.path());
        if file_type.is_symlink() {
            found.links.push(child);
        } else if file_type.is_dir() {
            found.children.push(child);
        }
    }
    Ok(found)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Write an envelope into the store layout of `mailbox_dir`
    pub fn write_store_envelope(mailbox_dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let messages = mailbox_dir
            .join("0C5B1D2E-7A3F-4E61-9B8D-123456789ABC")
            .join("Data")
            .join("1")
            .join("Messages");
        fs::create_dir_all(&messages).unwrap();
        let path = messages.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_store_envelope;
    use super::*;
    use crate::emlx::codec::test_support::{encode, encode_with_length};
    use crate::index::test_support::index_bytes;
    use plist::Dictionary;
    use tempfile::TempDir;

    const MESSAGE: &[u8] = b"From: a@example.com\nSubject: Hi\n\nBody\n";

    #[test]
    fn test_store_file_name_grammar() {
        assert_eq!(
            parse_store_file_name("42.emlx"),
            Some(FileNameParts { uid: 42, partial: false })
        );
        assert_eq!(
            parse_store_file_name("42.partial.emlx"),
            Some(FileNameParts { uid: 42, partial: true })
        );
        assert_eq!(parse_store_file_name("message-42.emlx"), None);
        assert_eq!(parse_store_file_name("42.emlx.bak"), None);
    }

    #[test]
    fn test_discover_with_account_directories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("V10");
        fs::create_dir_all(root.join("ACCOUNT/INBOX.mbox/Work.mbox")).unwrap();
        fs::create_dir_all(root.join("ACCOUNT/Sent.mbox")).unwrap();
        fs::create_dir_all(root.join("MailData")).unwrap();

        let discovery = StoreModel::new().discover(&root).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();

        assert_eq!(paths, vec!["ACCOUNT/INBOX", "ACCOUNT/INBOX/Work", "ACCOUNT/Sent"]);
        assert!(discovery.mailboxes[0].segments[0].is_account);
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_discover_uses_info_plist_name() {
        let temp = TempDir::new().unwrap();
        let mbox = temp.path().join("Renamed.mbox");
        fs::create_dir_all(&mbox).unwrap();
        let mut info = Dictionary::new();
        info.insert("MailboxName".to_string(), Value::from("Projects"));
        Value::Dictionary(info)
            .to_file_xml(mbox.join("Info.plist"))
            .unwrap();

        let discovery = StoreModel::new().discover(temp.path()).unwrap();
        assert_eq!(discovery.mailboxes.len(), 1);
        assert_eq!(discovery.mailboxes[0].display_path, "Projects");
    }

    #[test]
    fn test_unsafe_info_plist_names_fall_back_to_stem() {
        let temp = TempDir::new().unwrap();
        for (dir, name) in [("Up.mbox", "../Escape"), ("Slash.mbox", "a/b"), ("Dots.mbox", "..")] {
            let mbox = temp.path().join(dir);
            fs::create_dir_all(&mbox).unwrap();
            let mut info = Dictionary::new();
            info.insert("MailboxName".to_string(), Value::from(name));
            Value::Dictionary(info)
                .to_file_xml(mbox.join("Info.plist"))
                .unwrap();
        }

        let discovery = StoreModel::new().discover(temp.path()).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Dots", "Slash", "Up"]);
        assert!(discovery
            .mailboxes
            .iter()
            .all(|m| m.segment_names().iter().all(|s| is_plain_segment(s))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_reported_and_skipped() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("V10");
        write_store_envelope(&root.join("Inbox.mbox"), "1.emlx", &encode(MESSAGE, None));
        symlink("..", root.join("Loop.mbox")).unwrap();
        symlink("..", root.join("Inbox.mbox").join("Up.mbox")).unwrap();

        let discovery = StoreModel::new().discover(&root).unwrap();
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
            .all(|e| matches!(e, DiscoveryError::Loop(_))));
        assert!(discovery.errors.iter().any(|e| e.path().ends_with("Loop.mbox")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_account_is_reported_and_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("V10");
        fs::create_dir_all(root.join("Open/Inbox.mbox")).unwrap();
        fs::create_dir_all(root.join("Locked/Inbox.mbox")).unwrap();
        let locked = root.join("Locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Permission bits do not bind this user
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let discovery = StoreModel::new().discover(&root);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let discovery = discovery.unwrap();

        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Open/Inbox"]);
        assert_eq!(discovery.errors.len(), 1);
        assert!(matches!(
            &discovery.errors[0],
            DiscoveryError::Unreadable { path, .. } if path == &locked
        ));
    }

    #[test]
    fn test_discover_single_mbox_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Inbox.mbox");
        fs::create_dir_all(root.join("Child.mbox")).unwrap();

        let discovery = StoreModel::new().discover(&root).unwrap();
        let paths: Vec<&str> = discovery
            .mailboxes
            .iter()
            .map(|m| m.display_path.as_str())
            .collect();
        assert_eq!(paths, vec!["Inbox", "Inbox/Child"]);
    }

    #[test]
    fn test_discover_missing_root() {
        let temp = TempDir::new().unwrap();
        let err = StoreModel::new()
            .discover(&temp.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::RootNotFound(_)));
    }

    #[test]
    fn test_list_envelopes_skips_nested_and_malformed() {
        let temp = TempDir::new().unwrap();
        let mbox = temp.path().join("Inbox.mbox");
        write_store_envelope(&mbox, "1.emlx", &encode(MESSAGE, None));
        write_store_envelope(&mbox, "2.partial.emlx", &encode(MESSAGE, None));
        write_store_envelope(&mbox, "3.emlx", &encode_with_length(900, MESSAGE, None));
        write_store_envelope(&mbox, "notes.emlx", &encode(MESSAGE, None));
        write_store_envelope(&mbox, "4.emlx", b"not an envelope");
        write_store_envelope(&mbox.join("Nested.mbox"), "9.emlx", &encode(MESSAGE, None));
        fs::write(mbox.join("table_of_contents"), index_bytes(&[1, 2, 3])).unwrap();

        let model = StoreModel::new();
        let discovery = model.discover(temp.path()).unwrap();
        let inbox = discovery
            .mailboxes
            .iter()
            .find(|m| m.display_path == "Inbox")
            .unwrap();

        let listing = model.list_envelopes(inbox).unwrap();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing.skipped_files, 2);
        assert!(listing.envelopes["1.emlx"].is_complete());
        assert!(!listing.envelopes["2.partial.emlx"].is_complete());
        assert!(!listing.envelopes["3.emlx"].is_complete());

        let index = model.read_index(inbox).unwrap().unwrap();
        assert_eq!(index.len(), 3);
    }
}
