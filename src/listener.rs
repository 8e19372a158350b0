//! Sink-side transport: accepts connections, applies each inbound ADT message and acknowledges it.
//!
//! Every connection runs on its own task and carries exactly one exchange:
//!
//! ```text
//! Accepted -> Reading -> Decoding -> Dispatching -> Acknowledging -> Closed
//!                |           |            |               ^
//!                +-----------+------------+--> Errored ---+
//! ```
//!
//! A failure anywhere before the acknowledgment still produces one, with a negative outcome.

use crate::ack::{ack, encode_ack, Acknowledgment, Outcome};
use crate::builder::Routing;
use crate::codec::{self, peek_control_id};
use crate::error::{DirectoryError, DispatchError};
use crate::mllp::{MllpCodec, DEFAULT_MAX_FRAME_LENGTH};
use crate::router::Router;
use crate::session::printable;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_util::codec::Framed;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a single connection is in its exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Reading,
    Decoding,
    Dispatching,
    Errored,
    Acknowledging,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Accepted, Reading)
                | (Reading, Decoding)
                | (Reading, Errored)
                // peer hung up without sending anything, there is nobody to acknowledge
                | (Reading, Closed)
                | (Decoding, Dispatching)
                | (Decoding, Errored)
                | (Dispatching, Acknowledging)
                | (Dispatching, Errored)
                | (Errored, Acknowledging)
                | (Acknowledging, Closed)
        )
    }
}

struct Connection {
    peer: SocketAddr,
    state: ConnectionState,
}

impl Connection {
    fn new(peer: SocketAddr) -> Self {
        Connection {
            peer,
            state: ConnectionState::Accepted,
        }
    }

    fn enter(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!("HL7 {}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }
}

/// Turns inbound payloads into acknowledgments. Shared by every connection task.
pub struct Handler {
    router: Arc<Router>,
}

impl Handler {
    pub fn new(router: Arc<Router>) -> Self {
        Handler { router }
    }

    /// Decodes and dispatches one payload, returning the acknowledgment to send back.
    pub async fn handle(&self, payload: &[u8]) -> Acknowledgment {
        let mut connection = Connection::new(([0, 0, 0, 0], 0).into());
        connection.state = ConnectionState::Reading;
        self.respond(&mut connection, payload).await
    }

    async fn respond(&self, connection: &mut Connection, payload: &[u8]) -> Acknowledgment {
        connection.enter(ConnectionState::Decoding);
        let message = match codec::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                connection.enter(ConnectionState::Errored);
                let text = String::from_utf8_lossy(payload);
                warn!(
                    "HL7 {}: undecodable message ({}):\n{}",
                    connection.peer,
                    e,
                    printable(&text)
                );
                return match peek_control_id(payload) {
                    Some(control_id) => ack(&control_id, Outcome::Reject, Some(e.to_string())),
                    None => ack("", Outcome::Error, Some(e.to_string())),
                };
            }
        };

        info!(
            "HL7 {}: received {} (control id {}):\n{}",
            connection.peer,
            message.message_type(),
            message.control_id(),
            printable(&message.to_hl7())
        );

        connection.enter(ConnectionState::Dispatching);
        let router = Arc::clone(&self.router);
        let dispatched = {
            let message = message.clone();
            // the directory is a synchronous capability and may block
            tokio::task::spawn_blocking(move || router.dispatch(&message))
                .await
                .unwrap_or_else(|e| {
                    Err(DispatchError::DirectoryUnavailable(DirectoryError(format!(
                        "dispatch task failed: {}",
                        e
                    ))))
                })
        };

        match dispatched {
            Ok(mutation) => {
                debug!("HL7 {}: applied {:?}", connection.peer, mutation);
                Acknowledgment::for_message(&message, Outcome::Accept, None)
            }
            Err(e) => {
                connection.enter(ConnectionState::Errored);
                warn!(
                    "HL7 {}: rejecting control id {}: {}",
                    connection.peer,
                    message.control_id(),
                    e
                );
                Acknowledgment::for_message(&message, Outcome::Reject, Some(e.to_string()))
            }
        }
    }
}

/// The always-on HL7 listener of the sink system.
pub struct Listener {
    listener: TcpListener,
    handler: Arc<Handler>,
    routing: Routing,
    read_timeout: Duration,
    max_frame_length: usize,
}

impl Listener {
    /// Binds to `addr`. `routing` names this system as the sender of its acknowledgments.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        router: Arc<Router>,
        routing: Routing,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("HL7 listener bound to {}", listener.local_addr()?);
        Ok(Listener {
            listener,
            handler: Arc::new(Handler::new(router)),
            routing,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        })
    }

    /// How long a connection may take to deliver its message.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, one task each.
    pub async fn run(self) {
        let shared = Arc::new(Shared {
            handler: self.handler,
            routing: self.routing,
            read_timeout: self.read_timeout,
            max_frame_length: self.max_frame_length,
        });

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // usually out of file descriptors, give the other connections a moment
                    error!("HL7 listener failed to accept a connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                debug!("HL7 {}: connection opened", peer);
                process(stream, peer, &shared).await;
                debug!("HL7 {}: connection closed", peer);
            });
        }
    }
}

struct Shared {
    handler: Arc<Handler>,
    routing: Routing,
    read_timeout: Duration,
    max_frame_length: usize,
}

async fn process(stream: TcpStream, peer: SocketAddr, shared: &Shared) {
    let mut connection = Connection::new(peer);
    let mut transport = Framed::new(
        stream,
        MllpCodec::with_max_frame_length(shared.max_frame_length),
    );

    connection.enter(ConnectionState::Reading);
    let ack = match timeout(shared.read_timeout, transport.next()).await {
        Ok(Some(Ok(frame))) => shared.handler.respond(&mut connection, &frame).await,
        Ok(None) => {
            debug!("HL7 {}: peer closed without sending a message", peer);
            connection.enter(ConnectionState::Closed);
            return;
        }
        Ok(Some(Err(e))) => {
            connection.enter(ConnectionState::Errored);
            warn!("HL7 {}: error from MLLP transport: {}", peer, e);
            ack("", Outcome::Error, Some(e.to_string()))
        }
        Err(_) => {
            connection.enter(ConnectionState::Errored);
            warn!("HL7 {}: no message within {:?}", peer, shared.read_timeout);
            ack("", Outcome::Error, Some("timed out waiting for message".to_owned()))
        }
    };

    connection.enter(ConnectionState::Acknowledging);
    match transport.send(encode_ack(&ack, &shared.routing)).await {
        Ok(()) => debug!(
            "HL7 {}: sent {} for control id '{}'",
            peer, ack.outcome, ack.control_id
        ),
        Err(e) => warn!("HL7 {}: failed to send acknowledgment: {}", peer, e),
    }

    connection.enter(ConnectionState::Closed);
    if let Err(e) = transport.into_inner().shutdown().await {
        warn!("HL7 {}: error closing connection: {}", peer, e);
    }
}
