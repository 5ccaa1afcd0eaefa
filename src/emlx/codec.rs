use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::emlx::headers::HeaderBlock;
use crate::emlx::metadata::{parse_value, EnvelopeMetadata};
use crate::error::{FormatError, FormatResult};

/// Upper bound on header bytes read by [`EnvelopeCodec::probe`]
const PROBE_HEADER_LIMIT: usize = 64 * 1024;

/// Byte sequences that open a property-list document
const DOCUMENT_MARKERS: [&[u8]; 2] = [b"<?xml", b"bplist00"];

/// Openings of XML plists written without a declaration
const BARE_XML_MARKERS: [&[u8]; 2] = [b"<!DOCTYPE plist", b"<plist"];

/// A decoded `.emlx` envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Byte count announced on the first line
    pub declared_len: usize,
    /// Message bytes; shorter than `declared_len` when truncated
    pub message: Vec<u8>,
    /// Whether all declared bytes were present
    pub content_complete: bool,
    pub metadata: EnvelopeMetadata,
}

impl Envelope {
    /// Header block of the message bytes
    pub fn headers(&self) -> HeaderBlock {
        HeaderBlock::parse(&self.message)
    }
}

/// Result of reading only the start of an envelope file
#[derive(Debug, Clone)]
pub struct EnvelopeProbe {
    pub declared_len: usize,
    /// Length of the byte-count line including its terminator
    pub prefix_len: usize,
    pub headers: HeaderBlock,
}

impl EnvelopeProbe {
    /// Whether a file of `file_len` bytes can hold the declared message
    pub fn fits_in(&self, file_len: u64) -> bool {
        (self.prefix_len as u64)
            .checked_add(self.declared_len as u64)
            .map_or(false, |needed| file_len >= needed)
    }
}

/// Decoder for Apple Mail `.emlx` envelopes
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Decode envelope bytes.
    ///
    /// A declared length larger than the bytes present is not an error: the
    /// envelope comes back with `content_complete == false` and whatever
    /// message bytes precede the metadata block.
    pub fn decode(raw: &[u8]) -> FormatResult<Envelope> {
        let newline = raw
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(FormatError::MissingLengthLine)?;
        let declared_len = parse_length_line(&raw[..newline])?;
        let rest = &raw[newline + 1..];

        if rest.len() >= declared_len {
            let (message, trailer) = rest.split_at(declared_len);
            return Ok(Envelope {
                declared_len,
                message: message.to_vec(),
                content_complete: true,
                metadata: decode_metadata(trailer),
            });
        }

        debug!(
            "Envelope declares {} bytes but only {} remain",
            declared_len,
            rest.len()
        );
        let (message, trailer) = match find_metadata_start(rest) {
            Some(start) => rest.split_at(start),
            None => (rest, &[][..]),
        };

        Ok(Envelope {
            declared_len,
            message: message.to_vec(),
            content_complete: false,
            metadata: decode_metadata(trailer),
        })
    }

    /// Read and decode an envelope file
    pub fn read_file<P: AsRef<Path>>(path: P) -> FormatResult<Envelope> {
        let raw = fs::read(path)?;
        Self::decode(&raw)
    }

    /// Read the byte-count line and the header block only
    pub fn probe<R: Read>(reader: R) -> FormatResult<EnvelopeProbe> {
        let mut reader = BufReader::new(reader);
        let mut first = Vec::new();
        let n = reader.read_until(b'\n', &mut first)?;
        if n == 0 || first.last() != Some(&b'\n') {
            return Err(FormatError::MissingLengthLine);
        }
        let declared_len = parse_length_line(&first[..first.len() - 1])?;

        let mut header_bytes = Vec::new();
        let mut line = Vec::new();
        while header_bytes.len() < PROBE_HEADER_LIMIT.min(declared_len) {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let blank = line == b"\n" || line == b"\r\n";
            header_bytes.extend_from_slice(&line);
            if blank {
                break;
            }
        }
        header_bytes.truncate(declared_len);

        Ok(EnvelopeProbe {
            declared_len,
            prefix_len: n,
            headers: HeaderBlock::parse(&header_bytes),
        })
    }

    /// Probe an envelope file on disk
    pub fn probe_file<P: AsRef<Path>>(path: P) -> FormatResult<EnvelopeProbe> {
        let file = fs::File::open(path)?;
        Self::probe(file)
    }
}

fn parse_length_line(line: &[u8]) -> FormatResult<usize> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::InvalidLength(trimmed.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| FormatError::InvalidLength(trimmed.to_string()))
}

fn decode_metadata(trailer: &[u8]) -> EnvelopeMetadata {
    match EnvelopeMetadata::decode(trailer) {
        Some(metadata) => metadata,
        None => {
            if trailer.iter().any(|b| !b.is_ascii_whitespace()) {
                debug!("Ignoring unparsable envelope metadata ({} bytes)", trailer.len());
            }
            EnvelopeMetadata::default()
        }
    }
}

/// Start of the trailing metadata block inside a truncated envelope.
///
/// The last document opening whose tail parses wins; a body may quote XML
/// but the real trailer always comes after it.
fn find_metadata_start(rest: &[u8]) -> Option<usize> {
    [&DOCUMENT_MARKERS[..], &BARE_XML_MARKERS[..]]
        .into_iter()
        .find_map(|markers| {
            let mut candidates: Vec<usize> = markers
                .iter()
                .flat_map(|marker| find_all(rest, marker))
                .collect();
            candidates.sort_unstable_by(|a, b| b.cmp(a));
            candidates
                .into_iter()
                .find(|&start| parse_value(&rest[start..]).is_some())
        })
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(idx, _)| idx)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    const MESSAGE: &[u8] = b"From: a@example.com\nSubject: Sample\n\nBody\n";

    #[test]
    fn test_decode_complete_with_metadata() {
        let raw = encode(MESSAGE, Some(flags_dict(42)));
        let envelope = EnvelopeCodec::decode(&raw).unwrap();

        assert!(envelope.content_complete);
        assert_eq!(envelope.declared_len, MESSAGE.len());
        assert_eq!(envelope.message, MESSAGE);
        assert_eq!(envelope.metadata.flags, Some(42));
    }

    #[test]
    fn test_decode_without_metadata() {
        let raw = encode(MESSAGE, None);
        let envelope = EnvelopeCodec::decode(&raw).unwrap();
        assert!(envelope.content_complete);
        assert_eq!(envelope.message, MESSAGE);
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn test_declared_length_beyond_data_is_partial() {
        let raw = encode_with_length(4096, MESSAGE, Some(flags_dict(1)));
        let envelope = EnvelopeCodec::decode(&raw).unwrap();

        assert!(!envelope.content_complete);
        assert_eq!(envelope.declared_len, 4096);
        assert_eq!(envelope.message, MESSAGE);
        assert_eq!(envelope.metadata.flags, Some(1));
    }

    #[test]
    fn test_partial_body_containing_xml_text() {
        let body = b"Subject: x\n\nsee <?xml version=\"1.0\"?> inline\n";
        let raw = encode_with_length(9999, body, Some(flags_dict(3)));
        let envelope = EnvelopeCodec::decode(&raw).unwrap();

        assert!(!envelope.content_complete);
        assert_eq!(envelope.message, body.to_vec());
        assert_eq!(envelope.metadata.flags, Some(3));
    }

    #[test]
    fn test_partial_without_metadata_keeps_all_bytes() {
        let raw = encode_with_length(500, b"Subject: cut", None);
        let envelope = EnvelopeCodec::decode(&raw).unwrap();
        assert!(!envelope.content_complete);
        assert_eq!(envelope.message, b"Subject: cut");
    }

    #[test]
    fn test_padded_length_line() {
        let mut raw = format!("{}       \n", MESSAGE.len()).into_bytes();
        raw.extend_from_slice(MESSAGE);
        let envelope = EnvelopeCodec::decode(&raw).unwrap();
        assert!(envelope.content_complete);
    }

    #[test]
    fn test_garbage_metadata_is_ignored() {
        let mut raw = encode(MESSAGE, None);
        raw.extend_from_slice(b"\n<?xml broken");
        let envelope = EnvelopeCodec::decode(&raw).unwrap();
        assert!(envelope.content_complete);
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn test_invalid_length_line_fails() {
        assert!(matches!(
            EnvelopeCodec::decode(b"abc\nSubject: x\n"),
            Err(FormatError::InvalidLength(_))
        ));
        assert!(matches!(
            EnvelopeCodec::decode(b"12"),
            Err(FormatError::MissingLengthLine)
        ));
    }

    #[test]
    fn test_probe_reads_headers_only() {
        let raw = encode(MESSAGE, Some(flags_dict(1)));
        let probe = EnvelopeCodec::probe(&raw[..]).unwrap();

        assert_eq!(probe.declared_len, MESSAGE.len());
        assert_eq!(probe.headers.get("Subject"), Some("Sample"));
        assert!(probe.fits_in(raw.len() as u64));
        assert!(!probe.fits_in((probe.prefix_len + 3) as u64));
    }

    #[test]
    fn test_huge_declared_length_never_fits() {
        let raw = b"18446744073709551615
Subject: x

";
        let probe = EnvelopeCodec::probe(&raw[..]).unwrap();

        assert_eq!(probe.declared_len as u64, u64::MAX);
        assert!(!probe.fits_in(raw.len() as u64));
        assert!(!probe.fits_in(u64::MAX));
    }
}
