//! mboxrd reader
//!
//! Splits a mailbox file on `From ` separator lines and removes one level of
//! `>` quoting from escaped body lines.

use std::fs;
use std::io;
use std::path::Path;

use crate::emlx::HeaderBlock;

/// One message read back from an mbox file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MboxMessage {
    /// Separator line without its terminator
    pub separator: String,
    pub payload: Vec<u8>,
}

impl MboxMessage {
    pub fn headers(&self) -> HeaderBlock {
        HeaderBlock::parse(&self.payload)
    }
}

pub struct MboxReader;

impl MboxReader {
    pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Vec<MboxMessage>> {
        let raw = fs::read(path)?;
        Ok(Self::parse(&raw))
    }

    /// Split mbox bytes into messages; text before the first separator is ignored
    pub fn parse(raw: &[u8]) -> Vec<MboxMessage> {
        let mut messages = Vec::new();
        let mut current: Option<MboxMessage> = None;

        for line in raw.split_inclusive(|b| *b == b'\n') {
            if line.starts_with(b"From ") {
                if let Some(message) = current.take() {
                    messages.push(finish(message));
                }
                let separator = String::from_utf8_lossy(line)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_string();
                current = Some(MboxMessage {
                    separator,
                    payload: Vec::new(),
                });
                continue;
            }

            if let Some(message) = current.as_mut() {
                message.payload.extend_from_slice(unescape_line(line));
            }
        }

        if let Some(message) = current {
            messages.push(finish(message));
        }
        messages
    }
}

/// Drop the blank line that terminates every message
fn finish(mut message: MboxMessage) -> MboxMessage {
    let len = message.payload.len();
    if len >= 2 && message.payload[len - 1] == b'\n' && message.payload[len - 2] == b'\n' {
        message.payload.pop();
    }
    message
}

fn unescape_line(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|b| **b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}
