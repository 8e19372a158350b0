//! Source-side transport: one TCP connection per ADT event, closed once the acknowledgment is in.

use crate::ack::{decode_ack, Acknowledgment};
use crate::builder::{build_admission, build_discharge, Routing};
use crate::codec::{self, AdtMessage};
use crate::directory::PatientRecord;
use crate::error::TransportError;
use crate::mllp::MllpCodec;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::Framed;

/// Sends ADT events to the counterpart listener and waits for each acknowledgment.
#[derive(Debug, Clone)]
pub struct Session {
    host: String,
    port: u16,
    timeout: Duration,
    routing: Routing,
}

impl Session {
    /// `timeout` bounds the whole exchange: connect, write and waiting for the acknowledgment.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, routing: Routing) -> Self {
        Session {
            host: host.into(),
            port,
            timeout,
            routing,
        }
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Builds and sends an ADT^A01 for `patient`.
    pub async fn admit(&self, patient: &PatientRecord) -> Result<Acknowledgment, TransportError> {
        self.send_and_receive(&build_admission(patient, &self.routing))
            .await
    }

    /// Builds and sends an ADT^A03 for `patient`.
    pub async fn discharge(
        &self,
        patient: &PatientRecord,
    ) -> Result<Acknowledgment, TransportError> {
        self.send_and_receive(&build_discharge(patient, &self.routing))
            .await
    }

    /// Sends `message` on a fresh connection and returns the acknowledgment correlated to it.
    ///
    /// Exactly one attempt is made. The connection is shut down on every path, and a failure to
    /// shut it down is only logged.
    pub async fn send_and_receive(
        &self,
        message: &AdtMessage,
    ) -> Result<Acknowledgment, TransportError> {
        let deadline = Instant::now() + self.timeout;
        let addr = format!("{}:{}", self.host, self.port);

        info!(
            "Sending {} (control id {}) to {}:\n{}",
            message.message_type(),
            message.control_id(),
            addr,
            printable(&message.to_hl7())
        );

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match timeout_at(deadline, connect).await {
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
            Ok(Err(source)) => return Err(TransportError::ConnectFailed { addr, source }),
            Ok(Ok(stream)) => stream,
        };

        let mut transport = Framed::new(stream, MllpCodec::new());
        let exchanged = exchange(&mut transport, codec::encode(message));
        let result = match timeout_at(deadline, exchanged).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };
        close(transport).await;

        let ack = result?;
        if ack.control_id != message.control_id() {
            return Err(TransportError::MalformedResponse(format!(
                "acknowledgment correlates to '{}', expected '{}'",
                ack.control_id,
                message.control_id()
            )));
        }

        info!(
            "Response from {}: {} for control id {}{}",
            addr,
            ack.outcome,
            ack.control_id,
            ack.reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
        Ok(ack)
    }
}

/// One-off exchange without keeping a [`Session`] around.
pub async fn send_and_receive(
    message: &AdtMessage,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Acknowledgment, TransportError> {
    Session::new(host, port, timeout, Routing::default())
        .send_and_receive(message)
        .await
}

async fn exchange(
    transport: &mut Framed<TcpStream, MllpCodec>,
    payload: BytesMut,
) -> Result<Acknowledgment, TransportError> {
    transport
        .send(payload)
        .await
        .map_err(TransportError::WriteFailed)?;

    let response = match transport.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            return Err(TransportError::MalformedResponse(format!(
                "failed to read acknowledgment: {}",
                e
            )))
        }
        None => {
            return Err(TransportError::MalformedResponse(
                "connection closed before an acknowledgment arrived".to_owned(),
            ))
        }
    };
    debug!("Raw acknowledgment: {:?}", response);

    decode_ack(&response).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

async fn close(transport: Framed<TcpStream, MllpCodec>) {
    let mut stream = transport.into_inner();
    if let Err(e) = stream.shutdown().await {
        warn!("Error closing HL7 connection: {}", e);
    }
}

/// HL7 text with segment terminators turned into line breaks, for the logs.
pub(crate) fn printable(hl7: &str) -> String {
    hl7.trim_end_matches('\r').replace('\r', "\n")
}
