use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type FormatResult<T> = Result<T, FormatError>;
pub type WriterResult<T> = Result<T, WriteError>;
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Malformed envelope or index bytes
#[derive(Error, Debug)]
pub enum FormatError {
    /// The envelope has no terminated byte-count line
    #[error("Missing byte-count line")]
    MissingLengthLine,

    /// The byte-count line is not a decimal number
    #[error("Invalid byte-count line: {0:?}")]
    InvalidLength(String),

    /// The bytes are not a property list
    #[error("Property list error: {0}")]
    Plist(String),

    /// The property list parsed but has an unexpected shape
    #[error("Invalid index structure: {0}")]
    InvalidIndex(String),

    /// An index entry has no usable UID
    #[error("Index entry {position} has no usable UID")]
    MissingUid { position: usize },

    /// Old binary table of contents that only carries a message count
    #[error("Legacy table of contents ({message_count} messages) carries no UIDs")]
    LegacyTableOfContents { message_count: u32 },

    /// IO error while reading the bytes to decode
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    pub fn plist<S: Into<String>>(msg: S) -> Self {
        FormatError::Plist(msg.into())
    }

    pub fn invalid_index<S: Into<String>>(msg: S) -> Self {
        FormatError::InvalidIndex(msg.into())
    }
}

/// A part of a mail tree could not be walked
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// The root handed to discovery does not exist
    #[error("Root not found: {0}")]
    RootNotFound(PathBuf),

    /// A directory or file beneath the root could not be read
    #[error("Unreadable path {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// A symlink loop was detected while walking
    #[error("Filesystem loop at {0}")]
    Loop(PathBuf),
}

impl DiscoveryError {
    pub fn unreadable<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        DiscoveryError::Unreadable {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Convert a walkdir failure into a discovery error for `fallback`
    pub fn from_walk(err: walkdir::Error, fallback: &std::path::Path) -> Self {
        let path = err
            .path()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| fallback.to_path_buf());
        if err.loop_ancestor().is_some() {
            DiscoveryError::Loop(path)
        } else {
            DiscoveryError::unreadable(path, err.to_string())
        }
    }

    /// Path the error refers to
    pub fn path(&self) -> &std::path::Path {
        match self {
            DiscoveryError::RootNotFound(path) => path,
            DiscoveryError::Unreadable { path, .. } => path,
            DiscoveryError::Loop(path) => path,
        }
    }
}

/// An index exists for a mailbox but cannot be decoded
#[derive(Error, Debug)]
#[error("Index for mailbox '{mailbox}' at {path} is unreadable: {source}")]
pub struct FatalIndexError {
    pub mailbox: String,
    pub path: PathBuf,
    #[source]
    pub source: FormatError,
}

/// Failures while appending to a Thunderbird mailbox file
#[derive(Error, Debug)]
pub enum WriteError {
    /// Filesystem failure on the target
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A message without a payload reached the writer
    #[error("Refusing to write unrecoverable message UID {uid}")]
    Unrecoverable { uid: u64 },

    /// The target folder path is not usable
    #[error("Invalid target folder: {0}")]
    InvalidTarget(String),
}

impl WriteError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_target<S: Into<String>>(msg: S) -> Self {
        WriteError::InvalidTarget(msg.into())
    }
}

/// Run-level failures; anything per mailbox is reported instead
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("No mailboxes found under {0}")]
    NothingDiscovered(PathBuf),

    #[error("Thunderbird profile not found: {0}")]
    ProfileNotFound(PathBuf),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
