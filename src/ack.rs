//! ACK messages: the MSH + MSA reply correlated to a received message.

use crate::builder::Routing;
use crate::codec::AdtMessage;
use crate::error::DecodeError;
use crate::segment::{
    escape, find_segment, split_segments, unescape, MessageType, RawSegment, COMPONENT_SEPARATOR,
    FIELD_SEPARATOR, SEGMENT_TERMINATOR,
};
use bytes::BytesMut;
use std::fmt;

const ACK: &str = "ACK";

/// MSA-1, the acknowledgment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// AA, the message was applied.
    Accept,
    /// AE, the receiver failed while handling it.
    Error,
    /// AR, the message was refused.
    Reject,
}

impl Outcome {
    pub fn code(self) -> &'static str {
        match self {
            Outcome::Accept => "AA",
            Outcome::Error => "AE",
            Outcome::Reject => "AR",
        }
    }

    /// Original mode codes, plus the enhanced mode commit codes some systems answer with.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "AA" | "CA" => Some(Outcome::Accept),
            "AE" | "CE" => Some(Outcome::Error),
            "AR" | "CR" => Some(Outcome::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reply to exactly one received message. Built, written, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Control id of the message being acknowledged, empty when it could not be read.
    pub control_id: String,
    /// Trigger event of the acknowledged message, empty when unknown.
    pub trigger_event: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
}

/// Builds an acknowledgment for `original_control_id`. An empty reason is treated as none.
pub fn ack(original_control_id: &str, outcome: Outcome, reason: Option<String>) -> Acknowledgment {
    Acknowledgment {
        control_id: original_control_id.to_owned(),
        trigger_event: String::new(),
        outcome,
        reason: reason.filter(|r| !r.is_empty()),
    }
}

impl Acknowledgment {
    /// Acknowledges `message`, echoing its control id and trigger event.
    pub fn for_message(message: &AdtMessage, outcome: Outcome, reason: Option<String>) -> Self {
        ack(message.control_id(), outcome, reason)
            .with_trigger_event(&message.message_type().trigger_event)
    }

    pub fn with_trigger_event(mut self, trigger_event: &str) -> Self {
        self.trigger_event = trigger_event.to_owned();
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == Outcome::Accept
    }

    /// HL7 text for this acknowledgment, sent under `routing` with its own fresh control id.
    pub fn to_hl7(&self, routing: &Routing) -> String {
        let header = routing.header(MessageType::new(ACK, &self.trigger_event));

        let mut text = header.encode();
        text.push(SEGMENT_TERMINATOR);
        text.push_str("MSA");
        text.push(FIELD_SEPARATOR);
        text.push_str(self.outcome.code());
        text.push(FIELD_SEPARATOR);
        text.push_str(&escape(&self.control_id));
        if let Some(reason) = &self.reason {
            text.push(FIELD_SEPARATOR);
            text.push_str(&escape(reason));
        }
        text.push(SEGMENT_TERMINATOR);
        text
    }
}

pub fn encode_ack(ack: &Acknowledgment, routing: &Routing) -> BytesMut {
    BytesMut::from(ack.to_hl7(routing).as_bytes())
}

/// Decodes an acknowledgment payload. Only MSH-9 and the MSA segment are interpreted.
pub fn decode_ack(payload: &[u8]) -> Result<Acknowledgment, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let segments: Vec<RawSegment<'_>> = split_segments(text).map(RawSegment::parse).collect();

    let msh = match segments.first() {
        Some(first) if first.id() == "MSH" => first,
        _ => return Err(DecodeError::MissingSegment("MSH")),
    };
    let message_type = msh.field(9).unwrap_or_default();
    let mut components = message_type.split(COMPONENT_SEPARATOR);
    if components.next() != Some(ACK) {
        return Err(DecodeError::UnknownMessageType(message_type.to_owned()));
    }
    let trigger_event = components.next().unwrap_or_default().to_owned();

    let msa = &segments[find_segment(&segments, "MSA")?];
    let code = msa.required("MSA", 1)?;
    let outcome = Outcome::from_code(code).ok_or_else(|| DecodeError::InvalidField {
        segment: "MSA",
        field: 1,
        value: code.to_owned(),
    })?;
    let control_id = unescape(msa.field(2).unwrap_or_default());
    let reason = msa.field(3).map(unescape);

    Ok(ack(&control_id, outcome, reason).with_trigger_event(&trigger_event))
}
