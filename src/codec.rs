//! Whole-message encoding: typed [`AdtMessage`] to HL7 text and back.
//!
//! The message type in MSH-9 is classified exactly once, here. Everything downstream matches on
//! the [`AdtMessage`] variant.

use crate::error::DecodeError;
use crate::segment::{
    find_segment, split_segments, unescape, EventSegment, MessageHeader, MessageType,
    PatientSegment, RawSegment, SEGMENT_TERMINATOR,
};
use bytes::BytesMut;

pub const ADT: &str = "ADT";
pub const ADMISSION_EVENT: &str = "A01";
pub const DISCHARGE_EVENT: &str = "A03";

/// The segments shared by admission and discharge messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtBody {
    pub header: MessageHeader,
    pub event: EventSegment,
    pub patient: PatientSegment,
}

/// An ADT message as received or sent by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdtMessage {
    /// ADT^A01
    Admission(AdtBody),
    /// ADT^A03
    Discharge(AdtBody),
    /// A well-formed ADT header with a trigger event we do not act on, e.g. ADT^A08.
    Unsupported(MessageHeader),
}

impl AdtMessage {
    pub fn header(&self) -> &MessageHeader {
        match self {
            AdtMessage::Admission(body) | AdtMessage::Discharge(body) => &body.header,
            AdtMessage::Unsupported(header) => header,
        }
    }

    pub fn control_id(&self) -> &str {
        &self.header().control_id
    }

    pub fn message_type(&self) -> &MessageType {
        &self.header().message_type
    }

    pub fn patient(&self) -> Option<&PatientSegment> {
        match self {
            AdtMessage::Admission(body) | AdtMessage::Discharge(body) => Some(&body.patient),
            AdtMessage::Unsupported(_) => None,
        }
    }

    /// The message as HL7 text, every segment terminated by a carriage return.
    pub fn to_hl7(&self) -> String {
        let mut text = self.header().encode();
        text.push(SEGMENT_TERMINATOR);
        if let AdtMessage::Admission(body) | AdtMessage::Discharge(body) = self {
            text.push_str(&body.event.encode());
            text.push(SEGMENT_TERMINATOR);
            text.push_str(&body.patient.encode());
            text.push(SEGMENT_TERMINATOR);
        }
        text
    }
}

/// Encodes a message into the payload handed to the MLLP framing.
pub fn encode(message: &AdtMessage) -> BytesMut {
    BytesMut::from(message.to_hl7().as_bytes())
}

/// Decodes an MLLP payload into a typed message.
pub fn decode(payload: &[u8]) -> Result<AdtMessage, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let segments: Vec<RawSegment<'_>> = split_segments(text).map(RawSegment::parse).collect();

    match segments.first() {
        Some(first) if first.id() == "MSH" => {}
        _ => return Err(DecodeError::MissingSegment("MSH")),
    }
    let header = MessageHeader::decode(&segments[0])?;

    if header.message_type.code != ADT {
        return Err(DecodeError::UnknownMessageType(
            header.message_type.to_string(),
        ));
    }

    let admission = match header.message_type.trigger_event.as_str() {
        ADMISSION_EVENT => true,
        DISCHARGE_EVENT => false,
        _ => return Ok(AdtMessage::Unsupported(header)),
    };

    let event = EventSegment::decode(&segments[find_segment(&segments, "EVN")?])?;
    let patient = PatientSegment::decode(&segments[find_segment(&segments, "PID")?])?;
    let body = AdtBody {
        header,
        event,
        patient,
    };

    Ok(if admission {
        AdtMessage::Admission(body)
    } else {
        AdtMessage::Discharge(body)
    })
}

/// Pulls MSH-10 out of a payload that may be too broken to decode, so it can still be acknowledged.
pub fn peek_control_id(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let msh = split_segments(&text)
        .map(RawSegment::parse)
        .find(|segment| segment.id() == "MSH")?;
    match msh.field(10) {
        Some(id) if !id.is_empty() => Some(unescape(id)),
        _ => None,
    }
}
