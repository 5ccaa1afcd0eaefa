//! Mailbox index decoding
//!
//! A mailbox index is a property list listing the messages the mailbox is
//! supposed to contain. Three shapes are accepted: a dictionary with a
//! `messages` array, a dictionary keyed by decimal UID, or a bare array of
//! entry dictionaries.

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use serde::Serialize;
use std::io::Cursor;

use crate::emlx::metadata::{flag_word, parse_number, text, timestamp};
use crate::error::{FormatError, FormatResult};

/// File names probed for an index inside a mailbox directory, in order
pub const INDEX_FILE_NAMES: [&str; 2] = ["table_of_contents", "Index.plist"];

/// Magic number of the old binary table of contents
const LEGACY_TOC_MAGIC: u32 = 0x000D_BBA0;

/// One message listed by a mailbox index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub uid: u64,
    /// Expected envelope file name
    pub file_name: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Apple flag word
    pub flags: Option<u64>,
}

impl IndexEntry {
    pub fn new(uid: u64) -> Self {
        Self {
            uid,
            file_name: default_file_name(uid),
            subject: None,
            sender: None,
            date: None,
            flags: None,
        }
    }
}

/// Envelope file name an entry points at when the index names none
pub fn default_file_name(uid: u64) -> String {
    format!("{}.emlx", uid)
}

/// Decoder for mailbox index property lists
pub struct IndexCodec;

impl IndexCodec {
    /// Decode index bytes into entries, preserving index order
    pub fn decode(raw: &[u8]) -> FormatResult<Vec<IndexEntry>> {
        if let Some(message_count) = legacy_message_count(raw) {
            return Err(FormatError::LegacyTableOfContents { message_count });
        }

        let root = Value::from_reader(Cursor::new(raw))
            .map_err(|e| FormatError::plist(e.to_string()))?;

        match root {
            Value::Dictionary(dict) => match dict.get("messages") {
                Some(Value::Array(items)) => decode_array(items),
                Some(_) => Err(FormatError::invalid_index("'messages' is not an array")),
                None => decode_keyed(&dict),
            },
            Value::Array(items) => decode_array(&items),
            _ => Err(FormatError::invalid_index(
                "root is neither a dictionary nor an array",
            )),
        }
    }
}

/// Message count from an old binary table of contents header
pub fn legacy_message_count(raw: &[u8]) -> Option<u32> {
    if raw.len() < 8 {
        return None;
    }
    let magic = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    if magic != LEGACY_TOC_MAGIC {
        return None;
    }
    Some(u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]))
}

fn decode_array(items: &[Value]) -> FormatResult<Vec<IndexEntry>> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let dict = item.as_dictionary().ok_or_else(|| {
                FormatError::invalid_index(format!("entry {} is not a dictionary", position))
            })?;
            let uid = dict
                .get("uid")
                .and_then(uid_value)
                .ok_or(FormatError::MissingUid { position })?;
            Ok(decode_entry(uid, dict))
        })
        .collect()
}

fn decode_keyed(dict: &Dictionary) -> FormatResult<Vec<IndexEntry>> {
    dict.iter()
        .enumerate()
        .map(|(position, (key, value))| {
            let uid = parse_number(key).ok_or(FormatError::MissingUid { position })?;
            match value {
                Value::Dictionary(fields) => Ok(decode_entry(uid, fields)),
                Value::String(file_name) if !file_name.trim().is_empty() => {
                    let mut entry = IndexEntry::new(uid);
                    entry.file_name = file_name.trim().to_string();
                    Ok(entry)
                }
                _ => Err(FormatError::invalid_index(format!(
                    "entry for UID {} has an unsupported value",
                    uid
                ))),
            }
        })
        .collect()
}

fn decode_entry(uid: u64, dict: &Dictionary) -> IndexEntry {
    let file_name = ["file", "filename"]
        .iter()
        .find_map(|key| dict.get(key).and_then(text))
        .unwrap_or_else(|| default_file_name(uid));

    IndexEntry {
        uid,
        file_name,
        subject: dict.get("subject").and_then(text),
        sender: dict.get("sender").and_then(text),
        date: dict.get("date").and_then(timestamp),
        flags: dict.get("flags").and_then(flag_word),
    }
}

fn uid_value(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(int) => int.as_unsigned(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
