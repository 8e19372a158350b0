//! Typed MSH, EVN and PID segments and the field-level rules of the pipe-delimited HL7 syntax.
//!
//! Fields are addressed by their HL7 position (`PID-5` is the fifth field after the segment id).
//! MSH is the odd one out: its field separator is itself MSH-1, so `MSH-n` lives at split index
//! `n - 1`.

use crate::error::DecodeError;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

pub const FIELD_SEPARATOR: char = '|';
pub const COMPONENT_SEPARATOR: char = '^';
pub const REPETITION_SEPARATOR: char = '~';
pub const ESCAPE_CHARACTER: char = '\\';
pub const SUBCOMPONENT_SEPARATOR: char = '&';
/// MSH-2, the encoding characters in their standard order.
pub const ENCODING_CHARACTERS: &str = "^~\\&";
pub const SEGMENT_TERMINATOR: char = '\r';
pub const HL7_VERSION: &str = "2.5";

const DATE_FORMAT: &str = "%Y%m%d";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Escapes delimiter characters inside a single field or component value.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            FIELD_SEPARATOR => escaped.push_str("\\F\\"),
            COMPONENT_SEPARATOR => escaped.push_str("\\S\\"),
            SUBCOMPONENT_SEPARATOR => escaped.push_str("\\T\\"),
            REPETITION_SEPARATOR => escaped.push_str("\\R\\"),
            ESCAPE_CHARACTER => escaped.push_str("\\E\\"),
            '\r' => escaped.push_str("\\X0D\\"),
            '\n' => escaped.push_str("\\X0A\\"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverses [`escape`]. Escape sequences this crate does not know are kept verbatim.
pub fn unescape(value: &str) -> String {
    if !value.contains(ESCAPE_CHARACTER) {
        return value.to_owned();
    }

    let mut unescaped = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find(ESCAPE_CHARACTER) {
        unescaped.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = match after.find(ESCAPE_CHARACTER) {
            Some(end) => end,
            None => {
                // unterminated, take the rest literally
                unescaped.push_str(&rest[start..]);
                return unescaped;
            }
        };
        match &after[..end] {
            "F" => unescaped.push(FIELD_SEPARATOR),
            "S" => unescaped.push(COMPONENT_SEPARATOR),
            "T" => unescaped.push(SUBCOMPONENT_SEPARATOR),
            "R" => unescaped.push(REPETITION_SEPARATOR),
            "E" => unescaped.push(ESCAPE_CHARACTER),
            "X0D" => unescaped.push('\r'),
            "X0A" => unescaped.push('\n'),
            other => {
                unescaped.push(ESCAPE_CHARACTER);
                unescaped.push_str(other);
                unescaped.push(ESCAPE_CHARACTER);
            }
        }
        rest = &after[end + 1..];
    }
    unescaped.push_str(rest);
    unescaped
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a fixed-width `YYYYMMDD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, DecodeError> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidDate(value.to_owned()));
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| DecodeError::InvalidDate(value.to_owned()))
}

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a fixed-width `YYYYMMDDHHmmss` timestamp.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, DecodeError> {
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidTimestamp(value.to_owned()));
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|_| DecodeError::InvalidTimestamp(value.to_owned()))
}

/// Splits a payload into segment lines, accepting CR, LF or CRLF terminators.
pub(crate) fn split_segments(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c| c == '\r' || c == '\n')
        .filter(|line| !line.trim().is_empty())
}

/// One segment line split on the field separator, values still escaped.
#[derive(Debug)]
pub(crate) struct RawSegment<'a> {
    parts: Vec<&'a str>,
}

impl<'a> RawSegment<'a> {
    pub(crate) fn parse(line: &'a str) -> Self {
        RawSegment {
            parts: line.split(FIELD_SEPARATOR).collect(),
        }
    }

    pub(crate) fn id(&self) -> &'a str {
        self.parts[0]
    }

    /// The raw value at HL7 position `n`, `None` when the segment is shorter.
    pub(crate) fn field(&self, n: usize) -> Option<&'a str> {
        let index = if self.id() == "MSH" { n.checked_sub(1)? } else { n };
        self.parts.get(index).copied()
    }

    /// The raw value at position `n`, failing when it is absent or empty.
    pub(crate) fn required(&self, segment: &'static str, n: usize) -> Result<&'a str, DecodeError> {
        match self.field(n) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(DecodeError::MissingField(segment, n)),
        }
    }
}

/// Joins already-escaped field values into a segment line.
fn join_fields(fields: &[&str]) -> String {
    fields.join(&FIELD_SEPARATOR.to_string())
}

/// Finds the first segment with the given id.
pub(crate) fn find_segment<'a>(
    segments: &[RawSegment<'a>],
    id: &'static str,
) -> Result<usize, DecodeError> {
    segments
        .iter()
        .position(|s| s.id() == id)
        .ok_or(DecodeError::MissingSegment(id))
}

/// MSH-9: message code and trigger event, e.g. `ADT^A01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub code: String,
    pub trigger_event: String,
}

impl MessageType {
    pub fn new(code: &str, trigger_event: &str) -> Self {
        MessageType {
            code: code.to_owned(),
            trigger_event: trigger_event.to_owned(),
        }
    }

    /// Parses MSH-9. The message structure component (`ADT_A01`) is optional and ignored.
    pub fn parse(value: &str) -> Result<Self, DecodeError> {
        fn is_code(s: &str) -> bool {
            s.len() == 3
                && s.bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        }

        let mut components = value.split(COMPONENT_SEPARATOR);
        match (components.next(), components.next()) {
            (Some(code), Some(trigger)) if is_code(code) && is_code(trigger) => {
                Ok(MessageType::new(code, trigger))
            }
            _ => Err(DecodeError::UnknownMessageType(value.to_owned())),
        }
    }

    fn encode(&self) -> String {
        if self.trigger_event.is_empty() {
            return self.code.clone();
        }
        // ACK keeps the generic structure, everything else names its own
        let structure = if self.code == "ACK" {
            "ACK".to_owned()
        } else {
            format!("{}_{}", self.code, self.trigger_event)
        };
        format!(
            "{}{}{}{}{}",
            self.code, COMPONENT_SEPARATOR, self.trigger_event, COMPONENT_SEPARATOR, structure
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{}", self.code, self.trigger_event)
    }
}

/// MSH, the message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub control_id: String,
    pub timestamp: NaiveDateTime,
    pub processing_id: String,
}

impl MessageHeader {
    pub(crate) fn encode(&self) -> String {
        let timestamp = format_timestamp(self.timestamp);
        let message_type = self.message_type.encode();
        let sending_application = escape(&self.sending_application);
        let sending_facility = escape(&self.sending_facility);
        let receiving_application = escape(&self.receiving_application);
        let receiving_facility = escape(&self.receiving_facility);
        let control_id = escape(&self.control_id);
        let processing_id = escape(&self.processing_id);

        join_fields(&[
            "MSH",
            ENCODING_CHARACTERS,
            &sending_application,
            &sending_facility,
            &receiving_application,
            &receiving_facility,
            &timestamp,
            "",
            &message_type,
            &control_id,
            &processing_id,
            HL7_VERSION,
        ])
    }

    pub(crate) fn decode(segment: &RawSegment<'_>) -> Result<Self, DecodeError> {
        let message_type = MessageType::parse(segment.field(9).unwrap_or_default())?;

        Ok(MessageHeader {
            message_type,
            sending_application: unescape(segment.required("MSH", 3)?),
            sending_facility: unescape(segment.required("MSH", 4)?),
            receiving_application: unescape(segment.required("MSH", 5)?),
            receiving_facility: unescape(segment.required("MSH", 6)?),
            timestamp: parse_timestamp(segment.required("MSH", 7)?)?,
            control_id: unescape(segment.required("MSH", 10)?),
            processing_id: unescape(segment.required("MSH", 11)?),
        })
    }
}

/// EVN, the event segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSegment {
    pub event_type: String,
    pub recorded_at: NaiveDateTime,
}

impl EventSegment {
    pub(crate) fn encode(&self) -> String {
        let event_type = escape(&self.event_type);
        let recorded_at = format_timestamp(self.recorded_at);
        join_fields(&["EVN", &event_type, &recorded_at])
    }

    pub(crate) fn decode(segment: &RawSegment<'_>) -> Result<Self, DecodeError> {
        Ok(EventSegment {
            event_type: unescape(segment.field(1).unwrap_or_default()),
            recorded_at: parse_timestamp(segment.required("EVN", 2)?)?,
        })
    }
}

/// PID, the patient identification segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSegment {
    pub patient_id: u64,
    pub family_name: String,
    pub given_name: String,
    pub date_of_birth: NaiveDate,
}

impl PatientSegment {
    pub(crate) fn encode(&self) -> String {
        let patient_id = self.patient_id.to_string();
        let name = format!(
            "{}{}{}",
            escape(&self.family_name),
            COMPONENT_SEPARATOR,
            escape(&self.given_name)
        );
        let date_of_birth = format_date(self.date_of_birth);

        join_fields(&["PID", "", "", &patient_id, "", &name, "", &date_of_birth])
    }

    pub(crate) fn decode(segment: &RawSegment<'_>) -> Result<Self, DecodeError> {
        // PID-3 is CX, the id number is its first component
        let id_field = segment.required("PID", 3)?;
        let id = id_field.split(COMPONENT_SEPARATOR).next().unwrap_or_default();
        if id.is_empty() {
            return Err(DecodeError::MissingField("PID", 3));
        }
        let patient_id = id.parse::<u64>().map_err(|_| DecodeError::InvalidField {
            segment: "PID",
            field: 3,
            value: id.to_owned(),
        })?;

        let mut name = segment.required("PID", 5)?.split(COMPONENT_SEPARATOR);
        let family_name = name.next().map(unescape).unwrap_or_default();
        let given_name = name.next().map(unescape).unwrap_or_default();
        if family_name.is_empty() || given_name.is_empty() {
            return Err(DecodeError::MissingField("PID", 5));
        }

        // PID-7 is a timestamp in HL7, only the date part is ever sent here
        let date_of_birth = parse_date(segment.required("PID", 7)?)?;

        Ok(PatientSegment {
            patient_id,
            family_name,
            given_name,
            date_of_birth,
        })
    }
}
