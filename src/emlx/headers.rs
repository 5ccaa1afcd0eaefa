//! RFC 5322 header helpers for message payloads
//!
//! Only the header block is inspected here. Values are decoded lossily as UTF-8
//! and folded lines are joined with a single space.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parsed header block of a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Parse the header block at the start of `message`
    pub fn parse(message: &[u8]) -> Self {
        let header_bytes = &message[..header_block_len(message)];
        let mut fields: Vec<(String, String)> = Vec::new();

        for raw_line in header_bytes.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw_line);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of the previous field
                if let Some((_, value)) = fields.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(' ') {
                    fields.push((name.to_string(), value.trim().to_string()));
                }
            }
        }

        Self { fields }
    }

    /// First value of `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Non-empty value of `name`
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterate over all fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Bare address of the `From:` header
    pub fn sender_address(&self) -> Option<String> {
        self.get_non_empty("From").and_then(extract_address)
    }

    /// Parsed `Date:` header
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.get_non_empty("Date").and_then(parse_rfc2822_date)
    }

    /// Composite identity used to match copies of the same message
    pub fn message_key(&self) -> Option<MessageKey> {
        let key = MessageKey {
            message_id: self.get("Message-ID").unwrap_or_default().to_string(),
            date: self.get("Date").unwrap_or_default().to_string(),
            from: self.get("From").unwrap_or_default().to_string(),
            to: self.get("To").unwrap_or_default().to_string(),
            subject: self.get("Subject").unwrap_or_default().to_string(),
        };
        if key.is_blank() {
            None
        } else {
            Some(key)
        }
    }
}

/// Header values identifying one message independent of its location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MessageKey {
    pub message_id: String,
    pub date: String,
    pub from: String,
    pub to: String,
    pub subject: String,
}

impl MessageKey {
    fn is_blank(&self) -> bool {
        self.message_id.is_empty()
            && self.date.is_empty()
            && self.from.is_empty()
            && self.to.is_empty()
            && self.subject.is_empty()
    }
}

/// Byte length of the header block including the blank separator line.
/// Returns the full length when no blank line exists.
pub fn header_block_len(message: &[u8]) -> usize {
    let mut offset = 0;
    for line in message.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        if line == b"\n" || line == b"\r\n" {
            return offset;
        }
    }
    message.len()
}

/// Parse an RFC 2822 date, tolerating trailing comments such as `(PST)`
pub fn parse_rfc2822_date(value: &str) -> Option<DateTime<Utc>> {
    let mut cleaned = value.trim();
    if let Some(idx) = cleaned.find('(') {
        cleaned = cleaned[..idx].trim_end();
    }

    DateTime::parse_from_rfc2822(cleaned)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Extract the bare address from a mailbox header value
pub fn extract_address(value: &str) -> Option<String> {
    if let (Some(start), Some(end)) = (value.rfind('<'), value.rfind('>')) {
        if start < end {
            let address = value[start + 1..end].trim();
            if !address.is_empty() {
                return Some(address.to_string());
            }
        }
    }

    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c| c == '"' || c == '\'' || c == '<' || c == '>'))
        .find(|token| token.contains('@'))
        .map(|token| token.to_string())
}
