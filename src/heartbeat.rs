//! Heartbeat documents.
//!
//! A heartbeat is an XML document whose root element is `hb` in the
//! `http://heartbeat.reakteu.org` namespace:
//!
//! ```xml
//! <hb xmlns="http://heartbeat.reakteu.org" originator="test1" sender="test2"
//!     timestamp="2024-05-01T12:00:00.000000Z"/>
//! ```
//!
//! This module renders outgoing heartbeats from a template and recognizes
//! incoming ones by inspecting the document structure.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

pub const HEARTBEAT_NAMESPACE: &str = "http://heartbeat.reakteu.org";

/// `YYYY-MM-DDTHH:MM:SS.ffffffZ`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Replaced with the current timestamp each time a template is rendered.
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

const DEFAULT_TEMPLATE: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
    "<hb xmlns=\"http://heartbeat.reakteu.org\" originator=\"test1\" sender=\"test2\" ",
    "timestamp=\"{timestamp}\"/>\n"
);

#[derive(Error, Debug)]
pub enum HeartbeatError {
    /// The message looked like XML but is not well-formed.
    #[error("malformed XML at byte {position}: {reason}")]
    Malformed { position: u64, reason: String },
    #[error("invalid heartbeat timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a heartbeat timestamp. Any number of fractional digits is accepted.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, HeartbeatError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.fZ")
        .map(|naive| naive.and_utc())
        .map_err(|source| HeartbeatError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Text of an outgoing heartbeat with a `{timestamp}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    text: String,
}

impl Default for PayloadTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PayloadTemplate {
    /// Use `text` as the template. Text without the placeholder is sent as is.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        self.text
            .replace(TIMESTAMP_PLACEHOLDER, &format_timestamp(at))
    }
}

/// Attributes of a recognized heartbeat document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub originator: Option<String>,
    pub sender: Option<String>,
    /// `None` when the attribute is missing or unparseable.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Heartbeat {
    /// Age of the heartbeat at `now`, if it carried a timestamp.
    pub fn latency(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.timestamp.map(|ts| now - ts)
    }
}

fn malformed<T>(reader: &Reader<&[u8]>, reason: impl Into<String>) -> Result<T, HeartbeatError> {
    Err(HeartbeatError::Malformed {
        position: reader.buffer_position() as u64,
        reason: reason.into(),
    })
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    let attr = element.try_get_attribute(name).ok()??;
    attr.unescape_value().ok().map(|v| v.into_owned())
}

fn heartbeat_from(element: &BytesStart<'_>) -> Heartbeat {
    let timestamp = attribute(element, "timestamp").and_then(|value| {
        parse_timestamp(&value)
            .map_err(|e| tracing::debug!(error = %e, "heartbeat without usable timestamp"))
            .ok()
    });
    Heartbeat {
        originator: attribute(element, "originator"),
        sender: attribute(element, "sender"),
        timestamp,
    }
}

/// Inspect a message body.
///
/// Bodies whose first non-whitespace character is not `<` are plain text and
/// never heartbeats. Everything else is parsed as a complete XML document;
/// a document whose root element's local name ends in `hb` is a heartbeat.
/// Markup that is not a well-formed document is an error, never a silent
/// "not a heartbeat".
pub fn inspect(body: &str) -> Result<Option<Heartbeat>, HeartbeatError> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('<') {
        return Ok(None);
    }

    let mut reader = Reader::from_str(trimmed);
    let mut depth = 0usize;
    let mut root: Option<Heartbeat> = None;
    let mut seen_root = false;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => return malformed(&reader, e.to_string()),
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if depth == 0 {
                    if seen_root {
                        return malformed(&reader, "more than one root element");
                    }
                    seen_root = true;
                    if e.local_name().as_ref().ends_with(b"hb") {
                        root = Some(heartbeat_from(e));
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return malformed(&reader, "closing tag without opening tag");
                }
                depth -= 1;
            }
            Event::Text(ref text) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return malformed(&reader, "text outside the root element");
                }
            }
            Event::CData(_) if depth == 0 => {
                return malformed(&reader, "CDATA outside the root element");
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return malformed(&reader, "unclosed element at end of document");
    }
    if !seen_root {
        return malformed(&reader, "document has no root element");
    }
    Ok(root)
}

/// Whether `body` is a heartbeat document. See [`inspect`].
pub fn is_heartbeat(body: &str) -> Result<bool, HeartbeatError> {
    inspect(body).map(|hb| hb.is_some())
}
