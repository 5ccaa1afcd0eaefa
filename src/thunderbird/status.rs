//! Message status flags and their Mozilla header encoding

use serde::Serialize;

/// Attachment-count field value Apple Mail uses for "not counted"
const ATTACHMENTS_UNKNOWN: u64 = 0x3F;

const MOZ_READ: u32 = 0x0001;
const MOZ_REPLIED: u32 = 0x0002;
const MOZ_MARKED: u32 = 0x0004;
const MOZ_FORWARDED: u32 = 0x1000;
const MOZ_REDIRECTED: u32 = 0x2000;
const MOZ2_HAS_ATTACHMENT: u32 = 0x1000_0000;

/// Status of one message, independent of either client's encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub read: bool,
    pub replied: bool,
    pub flagged: bool,
    pub forwarded: bool,
    pub redirected: bool,
    pub has_attachments: bool,
}

impl StatusFlags {
    /// Decode an Apple Mail flag word
    pub fn from_apple(flags: u64) -> Self {
        let attachment_count = (flags >> 10) & 0x3F;
        Self {
            read: flags & (1 << 0) != 0,
            replied: flags & (1 << 2) != 0,
            flagged: flags & (1 << 4) != 0,
            forwarded: flags & (1 << 8) != 0,
            redirected: flags & (1 << 9) != 0,
            has_attachments: attachment_count != 0 && attachment_count != ATTACHMENTS_UNKNOWN,
        }
    }

    /// `X-Mozilla-Status` value
    pub fn mozilla_status(&self) -> u32 {
        let mut status = 0;
        if self.read {
            status |= MOZ_READ;
        }
        if self.replied {
            status |= MOZ_REPLIED;
        }
        if self.flagged {
            status |= MOZ_MARKED;
        }
        if self.forwarded {
            status |= MOZ_FORWARDED;
        }
        if self.redirected {
            status |= MOZ_REDIRECTED;
        }
        status
    }

    /// `X-Mozilla-Status2` value
    pub fn mozilla_status2(&self) -> u32 {
        if self.has_attachments {
            MOZ2_HAS_ATTACHMENT
        } else {
            0
        }
    }

    /// Both status header lines, each newline-terminated
    pub fn mozilla_headers(&self) -> String {
        format!(
            "X-Mozilla-Status: {:04X}\nX-Mozilla-Status2: {:08X}\n",
            self.mozilla_status(),
            self.mozilla_status2()
        )
    }
}
