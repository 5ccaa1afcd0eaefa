use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::emlx::headers::{extract_address, header_block_len, parse_rfc2822_date};
use crate::emlx::HeaderBlock;
use crate::error::{WriteError, WriterResult};
use crate::recovery::ResolvedMessage;

/// Sender used in separators when a message has no `From:` header
pub const DEFAULT_FALLBACK_SENDER: &str = "MAILER-DAEMON";

/// Separator date format, e.g. `Thu Jan 01 00:00:00 1970`
const SEPARATOR_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Sub-folder container suffix used by Thunderbird
const FOLDER_CONTAINER_SUFFIX: &str = ".sbd";

/// Whether [`MailboxWriter::append`] touches the target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Preview,
}

/// Outcome of one append call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub target: PathBuf,
    pub messages_written: usize,
    pub bytes_written: u64,
    pub mode: WriteMode,
}

/// Appends resolved messages to a Thunderbird local-folder mbox file
#[derive(Debug, Clone)]
pub struct MailboxWriter {
    fallback_sender: String,
}

impl Default for MailboxWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxWriter {
    pub fn new() -> Self {
        Self {
            fallback_sender: DEFAULT_FALLBACK_SENDER.to_string(),
        }
    }

    pub fn with_fallback_sender<S: Into<String>>(mut self, sender: S) -> Self {
        let sender = sender.into();
        if !sender.trim().is_empty() {
            self.fallback_sender = sender.trim().to_string();
        }
        self
    }

    /// Format `messages` and append them to `target`.
    ///
    /// Every message is checked before anything is written, so a rejected
    /// message leaves the file untouched. Messages are then formatted and
    /// streamed one at a time. Preview mode returns the same result without
    /// opening the file for writing.
    pub fn append(
        &self,
        target: &Path,
        messages: &[ResolvedMessage],
        mode: WriteMode,
    ) -> WriterResult<WriteResult> {
        if let Some(rejected) = messages.iter().find(|m| !m.is_writable()) {
            return Err(WriteError::Unrecoverable { uid: rejected.uid });
        }
        if messages.is_empty() {
            return Ok(WriteResult {
                target: target.to_path_buf(),
                messages_written: 0,
                bytes_written: 0,
                mode,
            });
        }

        let leading_newline = needs_leading_newline(target)?;
        let bytes_written = match mode {
            WriteMode::Append => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(target)
                    .map_err(|e| WriteError::io(target, e))?;
                let mut out = BufWriter::new(file);
                let bytes = self.stream(&mut out, target, messages, leading_newline)?;
                info!("Appended {} messages to {}", messages.len(), target.display());
                bytes
            }
            WriteMode::Preview => {
                let bytes = self.stream(&mut io::sink(), target, messages, leading_newline)?;
                debug!(
                    "Preview of {} messages for {} ({} bytes)",
                    messages.len(),
                    target.display(),
                    bytes
                );
                bytes
            }
        };

        Ok(WriteResult {
            target: target.to_path_buf(),
            messages_written: messages.len(),
            bytes_written,
            mode,
        })
    }

    /// Write each formatted message to `out`, holding one at a time
    fn stream<W: Write>(
        &self,
        out: &mut W,
        target: &Path,
        messages: &[ResolvedMessage],
        leading_newline: bool,
    ) -> WriterResult<u64> {
        let io_error = |e: io::Error| WriteError::io(target, e);
        let mut bytes = 0u64;
        if leading_newline {
            out.write_all(b"\n").map_err(io_error)?;
            bytes += 1;
        }
        for message in messages {
            let formatted = self.format_message(message)?;
            out.write_all(&formatted).map_err(io_error)?;
            bytes += formatted.len() as u64;
        }
        out.flush().map_err(io_error)?;
        Ok(bytes)
    }

    /// Separator, status headers, escaped payload, and the terminating blank line
    pub fn format_message(&self, message: &ResolvedMessage) -> WriterResult<Vec<u8>> {
        if !message.is_writable() {
            return Err(WriteError::Unrecoverable { uid: message.uid });
        }

        let headers = HeaderBlock::parse(&message.payload);
        let mut out = self
            .format_separator(headers.get("From"), headers.get("Date"))
            .into_bytes();

        let mut body = message.status.mozilla_headers().into_bytes();
        body.extend(strip_status_headers(&message.payload));
        out.extend(escape_from_lines(&body));

        if out.last() != Some(&b'\n') {
            out.push(b'\n');
        }
        out.push(b'\n');
        Ok(out)
    }

    /// `From <sender> <date>` line for a message with the given headers
    pub fn format_separator(&self, from: Option<&str>, date: Option<&str>) -> String {
        let sender = from
            .and_then(extract_address)
            .or_else(|| {
                from.map(|raw| raw.split_whitespace().collect::<Vec<_>>().join("_"))
                    .filter(|raw| !raw.is_empty())
            })
            .unwrap_or_else(|| self.fallback_sender.clone());

        // Unparsable dates fall back to the epoch
        let timestamp: DateTime<Utc> = date.and_then(parse_rfc2822_date).unwrap_or_default();

        format!("From {} {}\n", sender, timestamp.format(SEPARATOR_DATE_FORMAT))
    }
}

/// Quote every line that would read as a separator (`^>*From `)
pub fn escape_from_lines(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    for line in payload.split_inclusive(|b| *b == b'\n') {
        let quotes = line.iter().take_while(|b| **b == b'>').count();
        if line[quotes..].starts_with(b"From ") {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    out
}

/// Drop existing `X-Mozilla-Status*` fields, continuations included
fn strip_status_headers(payload: &[u8]) -> Vec<u8> {
    let split = header_block_len(payload);
    let (header, body) = payload.split_at(split);

    let mut out = Vec::with_capacity(payload.len());
    let mut dropping = false;
    for line in header.split_inclusive(|b| *b == b'\n') {
        let continuation = line.first().map_or(false, |b| *b == b' ' || *b == b'\t');
        if continuation {
            if !dropping {
                out.extend_from_slice(line);
            }
            continue;
        }
        let name = line.split(|b| *b == b':').next().unwrap_or_default();
        dropping = String::from_utf8_lossy(name)
            .trim()
            .to_ascii_lowercase()
            .starts_with("x-mozilla-status");
        if !dropping {
            out.extend_from_slice(line);
        }
    }
    out.extend_from_slice(body);
    out
}

fn needs_leading_newline(target: &Path) -> WriterResult<bool> {
    let mut file = match fs::File::open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(WriteError::io(target, e)),
    };
    let len = file
        .metadata()
        .map_err(|e| WriteError::io(target, e))?
        .len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| WriteError::io(target, e))?;
    Ok(last[0] != b'\n')
}

/// Resolve the local folder file beneath a profile, creating it if needed
pub fn ensure_local_folder(profile_root: &Path, relative: &Path) -> WriterResult<PathBuf> {
    if relative.is_absolute() {
        return Err(WriteError::invalid_target(format!(
            "{} must be relative to the profile",
            relative.display()
        )));
    }
    let target = profile_root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
    }
    touch(&target)?;
    Ok(target)
}

/// Mailbox file for `segments` beneath `base`, e.g. `base.sbd/Inbox.sbd/Work`
pub fn compute_mailbox_path<S: AsRef<str>>(base: &Path, segments: &[S]) -> PathBuf {
    let mut current = base.to_path_buf();
    for segment in segments {
        current = container_of(&current).join(folder_segment(segment.as_ref()));
    }
    current
}

/// Like [`compute_mailbox_path`] but creates every container and file
pub fn ensure_mailbox_path<S: AsRef<str>>(base: &Path, segments: &[S]) -> WriterResult<PathBuf> {
    let mut current = base.to_path_buf();
    for segment in segments {
        let container = container_of(&current);
        fs::create_dir_all(&container).map_err(|e| WriteError::io(&container, e))?;
        current = container.join(folder_segment(segment.as_ref()));
        touch(&current)?;
    }
    Ok(current)
}

/// A folder name that stays one path component below its container
pub fn folder_segment(name: &str) -> String {
    let escaped: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    match escaped.as_str() {
        "" | "." | ".." => format!("_{}", escaped),
        _ => escaped,
    }
}

fn container_of(mailbox: &Path) -> PathBuf {
    let mut name = mailbox
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(FOLDER_CONTAINER_SUFFIX);
    mailbox.with_file_name(name)
}

fn touch(path: &Path) -> WriterResult<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|e| WriteError::io(path, e))
}
