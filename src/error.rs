use std::io;

/// Failure to turn HL7 text back into a typed message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8 text")]
    NotUtf8,
    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),
    #[error("missing segment {0}")]
    MissingSegment(&'static str),
    #[error("missing required field {0}-{1}")]
    MissingField(&'static str, usize),
    #[error("invalid value '{value}' in field {segment}-{field}")]
    InvalidField {
        segment: &'static str,
        field: usize,
        value: String,
    },
    #[error("invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),
    #[error("invalid timestamp '{0}', expected YYYYMMDDHHmmss")]
    InvalidTimestamp(String),
}

/// Failure of a client-side exchange. The caller decides whether to retry.
///
/// Anything that goes wrong after the message was written, a reset or an oversized frame
/// included, is a `MalformedResponse`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to write message: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("malformed acknowledgment: {0}")]
    MalformedResponse(String),
}

/// Failure to apply a decoded message to the patient directory.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unsupported message type '{0}'")]
    UnsupportedType(String),
    #[error("patient directory unavailable: {0}")]
    DirectoryUnavailable(#[from] DirectoryError),
}

/// Raised by a [`crate::PatientDirectory`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DirectoryError(pub String);

/// An environment value that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("invalid value '{value}' for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}
