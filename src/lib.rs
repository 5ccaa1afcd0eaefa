pub mod cli;
pub mod config;
pub mod emlx;
pub mod error;
pub mod index;
pub mod migration;
pub mod reconcile;
pub mod recovery;
pub mod source;
pub mod thunderbird;

pub use config::MigrationConfig;
pub use error::{
    ConfigError, DiscoveryError, FatalIndexError, FormatError, MigrationError, MigrationResult,
    WriteError,
};
pub use migration::{MigrationOrchestrator, MigrationReport, MigrationRequest, MigrationTarget, ScanReport};
pub use source::{MailSource, SourceKind};
