#[cfg(test)]
#[path = "frame_parser_test.rs"]
mod tests;

use crate::domain::models::StreamEvent;

const EVENT_PREFIX: &str = "event:";
const PAYLOAD_PREFIX: &str = "data:";

/// Classification of a single line from the event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameLine {
    EventType(String),
    Payload(String),
    /// Frame terminator. Payload lines are self contained so nothing is
    /// assembled across blanks.
    Blank,
    Ignorable,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode stream payload {raw:?}: {source}")]
pub struct ParseError {
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

pub fn parse_line(line: &str) -> FrameLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return FrameLine::Blank;
    }

    if let Some(name) = trimmed.strip_prefix(EVENT_PREFIX) {
        return FrameLine::EventType(name.trim().to_string());
    }

    if let Some(raw) = trimmed.strip_prefix(PAYLOAD_PREFIX) {
        return FrameLine::Payload(raw.trim().to_string());
    }

    return FrameLine::Ignorable;
}

pub fn decode(raw: &str) -> Result<StreamEvent, ParseError> {
    return serde_json::from_str::<StreamEvent>(raw).map_err(|source| {
        return ParseError {
            raw: raw.to_string(),
            source,
        };
    });
}

/// Runs a line through classification and decoding. Anything that is not a
/// decodable payload yields `None`; decoding failures are logged and skipped.
pub fn parse_event(line: &str) -> Option<StreamEvent> {
    match parse_line(line) {
        FrameLine::Payload(raw) => match decode(&raw) {
            Ok(event) => return Some(event),
            Err(err) => {
                tracing::warn!(raw = %err.raw, error = %err.source, "Skipping malformed stream payload");
                return None;
            }
        },
        FrameLine::EventType(name) => {
            tracing::trace!(name = %name, "Stream event marker");
            return None;
        }
        FrameLine::Blank => return None,
        FrameLine::Ignorable => {
            tracing::debug!(line = line, "Ignoring unrecognised stream line");
            return None;
        }
    }
}
