//! Trailing property-list metadata of an `.emlx` file
//!
//! Apple Mail writes a dictionary after the message bytes. The keys are not
//! versioned, so every field is read opportunistically.

use chrono::{DateTime, TimeZone, Utc};
use plist::{Dictionary, Value};
use serde::Serialize;
use std::io::Cursor;
use std::time::SystemTime;

use crate::emlx::headers::parse_rfc2822_date;

/// Best-effort view of the trailing metadata block
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvelopeMetadata {
    /// Apple flag word
    pub flags: Option<u64>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub to: Vec<String>,
    pub date_sent: Option<DateTime<Utc>>,
    pub date_received: Option<DateTime<Utc>>,
    pub remote_id: Option<String>,
}

impl EnvelopeMetadata {
    /// Decode a metadata block; empty or unparsable input yields `None`
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let data = trim_leading_whitespace(raw);
        if data.is_empty() {
            return None;
        }

        let value = parse_value(data)?;
        value.as_dictionary().map(Self::from_dictionary)
    }

    pub fn from_dictionary(dict: &Dictionary) -> Self {
        let to = match dict.get("to") {
            Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
            Some(other) => text(other).into_iter().collect(),
            None => Vec::new(),
        };

        Self {
            flags: lookup(dict, &["flags", "Flags"]).and_then(flag_word),
            subject: lookup(dict, &["subject"]).and_then(text),
            sender: lookup(dict, &["sender", "from"]).and_then(text),
            to,
            date_sent: lookup(dict, &["date-sent"]).and_then(timestamp),
            date_received: lookup(dict, &["date-received"]).and_then(timestamp),
            remote_id: lookup(dict, &["remote-id"]).and_then(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn lookup<'a>(dict: &'a Dictionary, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| dict.get(key))
}

/// Parse XML or binary property-list bytes
pub(crate) fn parse_value(data: &[u8]) -> Option<Value> {
    Value::from_reader(Cursor::new(data)).ok()
}

fn trim_leading_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    &raw[start..]
}

/// Lenient reading of an Apple flag word
pub(crate) fn flag_word(value: &Value) -> Option<u64> {
    match value {
        Value::Integer(int) => int
            .as_unsigned()
            .or_else(|| int.as_signed().map(|v| v as u64)),
        Value::Real(real) if *real >= 0.0 => Some(*real as u64),
        Value::Boolean(flag) => Some(u64::from(*flag)),
        Value::String(text) => parse_number(text),
        Value::Data(bytes) => std::str::from_utf8(bytes).ok().and_then(parse_number),
        _ => None,
    }
}

/// Decimal or `0x` hexadecimal number
pub(crate) fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Non-empty string value
pub(crate) fn text(value: &Value) -> Option<String> {
    value
        .as_string()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Plist date, epoch seconds, or RFC 2822 string
pub(crate) fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Date(date) => Some(DateTime::<Utc>::from(SystemTime::from(*date))),
        Value::Integer(int) => int
            .as_signed()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::Real(secs) => Utc.timestamp_opt(*secs as i64, 0).single(),
        Value::String(text) => parse_rfc2822_date(text).or_else(|| {
            text.trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        }),
        _ => None,
    }
}
