use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single EOL received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF or CRLF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP 1.2 wire format.
///
/// The decoder parses directly from the read buffer and only consumes bytes
/// once a whole frame is present, so it can be fed arbitrary chunks. Bodies
/// are either NUL-terminated or sized by a `content-length` header.
///
/// Frames larger than the configured maximum are rejected instead of being
/// buffered.
#[derive(Debug)]
pub struct StompCodec {
    max_frame_size: usize,
}

/// Default upper bound for a single encoded frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StompCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// CONNECT and CONNECTED frames carry header values verbatim.
fn escapes_headers(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

fn escape_header(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_header(raw: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(&b'\\') => out.push(b'\\'),
            Some(&b'n') => out.push(b'\n'),
            Some(&b'r') => out.push(b'\r'),
            Some(&b'c') => out.push(b':'),
            Some(other) => {
                return Err(invalid(format!(
                    "undefined header escape sequence \\{}",
                    *other as char
                )));
            }
            None => return Err(invalid("header ends with a lone backslash")),
        }
    }
    Ok(out)
}

fn header_text(raw: &[u8], escaped: bool) -> io::Result<String> {
    let bytes = if escaped {
        unescape_header(raw)?
    } else {
        raw.to_vec()
    };
    String::from_utf8(bytes).map_err(|e| invalid(format!("invalid utf8 in header: {}", e)))
}

/// Locate the next line starting at `from`. Returns the line without its
/// EOL (LF or CRLF) and the offset just past the LF.
fn next_line(input: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rel = input[from..].iter().position(|&b| b == b'\n')?;
    let mut line = &input[from..from + rel];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    Some((line, from + rel + 1))
}

/// Parse one frame from the front of `input`.
///
/// Returns `Ok(None)` when `input` does not yet hold a complete frame, or the
/// frame together with the number of bytes it occupied.
fn parse_frame(input: &[u8], max_frame_size: usize) -> io::Result<Option<(Frame, usize)>> {
    let Some((command_line, mut pos)) = next_line(input, 0) else {
        return Ok(None);
    };
    let command = String::from_utf8(command_line.to_vec())
        .map_err(|e| invalid(format!("invalid utf8 in command: {}", e)))?;
    let escaped = escapes_headers(&command);

    let mut headers = Vec::new();
    loop {
        let Some((line, next)) = next_line(input, pos) else {
            return Ok(None);
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| {
                invalid(format!(
                    "malformed header line: {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
        headers.push((
            header_text(&line[..colon], escaped)?,
            header_text(&line[colon + 1..], escaped)?,
        ));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| invalid(format!("invalid content-length '{}': {}", v, e)))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .and_then(|n| n.checked_add(1))
                .filter(|&end| end <= max_frame_size)
                .ok_or_else(|| invalid(format!("content-length {} too large", len)))?;
            if input.len() < end {
                return Ok(None);
            }
            if input[pos + len] != 0 {
                return Err(invalid("missing NUL terminator after content-length body"));
            }
            pos + len
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(rel) => pos + rel,
            None => return Ok(None),
        },
    };

    let body = input[pos..body_end].to_vec();
    let mut consumed = body_end + 1;
    if input.get(consumed) == Some(&b'\n') {
        consumed += 1;
    }

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        consumed,
    )))
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.first() {
            None => return Ok(None),
            Some(&b'\n') => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            Some(&b'\r') if src.get(1) == Some(&b'\n') => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            _ => {}
        }

        match parse_frame(&src[..], self.max_frame_size)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(StompItem::Frame(frame)))
            }
            None if src.len() > self.max_frame_size => Err(invalid(format!(
                "frame exceeds {} bytes",
                self.max_frame_size
            ))),
            None => Ok(None),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        let escaped = escapes_headers(&frame.command);
        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');

        let mut headers = frame.headers;
        let has_cl = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        // Text bodies go without content-length so brokers treat them as text
        // messages; anything containing NUL needs the explicit length.
        if !has_cl && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err()) {
            headers.push(("content-length".to_string(), frame.body.len().to_string()));
        }

        for (k, v) in headers {
            if escaped {
                dst.extend_from_slice(escape_header(&k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(escape_header(&v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
