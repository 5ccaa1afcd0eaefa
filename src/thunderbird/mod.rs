//! Thunderbird local folder support
//!
//! Local folders are mboxrd files. Sub-folders of `Name` live in a sibling
//! `Name.sbd` directory. The `.msf` summary files are left for Thunderbird to
//! rebuild.

pub mod reader;
pub mod status;
pub mod writer;

pub use reader::{MboxMessage, MboxReader};
pub use status::StatusFlags;
pub use writer::{
    compute_mailbox_path, ensure_local_folder, ensure_mailbox_path, escape_from_lines, folder_segment,
    MailboxWriter, WriteMode, WriteResult,
};
