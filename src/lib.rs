/*!
# HL7v2 admission and discharge exchange over MLLP.

 This crate carries patient admissions (ADT^A01) and discharges (ADT^A03) from an intake system (the
 *source*) to a hospital information system (the *sink*), one TCP connection per event, framed with HL7's
 Minimal Lower Layer Protocol.

 - [`build_admission`]/[`build_discharge`] turn a [`PatientRecord`] into an [`AdtMessage`] with a fresh control id.
 - [`encode`]/[`decode`] convert between [`AdtMessage`] and the pipe-delimited HL7 text.
 - [`Session`] sends one message and waits for the [`Acknowledgment`] correlated to it.
 - [`Listener`] accepts connections, applies each message through a [`Router`] to a [`PatientDirectory`],
   and answers every message with an acknowledgment, including the ones it cannot read.
 - [`MllpCodec`] is the Tokio codec doing the framing underneath both.

 ## Example
 ### Source
 ```no_run
use chrono::NaiveDate;
use hl7_adt_link::{Config, PatientRecord};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let session = Config::from_env()?.session();

    let dob = NaiveDate::from_ymd_opt(1990, 5, 1).unwrap();
    let patient = PatientRecord::new(42, "Ivan", "Petrov", dob);
    let ack = session.admit(&patient).await?;
    println!("HIS answered {} for control id {}", ack.outcome, ack.control_id);

    Ok(())
}
```

 ### Sink
 ```no_run
use std::sync::Arc;
use hl7_adt_link::{Config, Listener, MemoryDirectory, Router, SnapshotBroadcaster};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let broadcaster = SnapshotBroadcaster::new(16);
    let router = Router::new(Arc::new(MemoryDirectory::new()), Arc::new(broadcaster.clone()));

    Listener::bind(config.listen_addr(), Arc::new(router), config.routing.reversed())
        .await?
        .run()
        .await;
    Ok(())
}
```
 */

pub mod ack;
pub mod builder;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod listener;
pub mod mllp;
pub mod router;
pub mod segment;
pub mod session;

pub use crate::ack::{ack, decode_ack, encode_ack, Acknowledgment, Outcome};
pub use crate::builder::{build_admission, build_discharge, next_control_id, Routing};
pub use crate::codec::{decode, encode, peek_control_id, AdtBody, AdtMessage};
pub use crate::config::Config;
pub use crate::directory::{
    DirectoryObserver, MemoryDirectory, PatientDirectory, PatientId, PatientRecord,
    SnapshotBroadcaster,
};
pub use crate::error::{ConfigError, DecodeError, DirectoryError, DispatchError, TransportError};
pub use crate::listener::{ConnectionState, Handler, Listener};
pub use crate::mllp::MllpCodec;
pub use crate::router::{DirectoryMutation, Router};
pub use crate::segment::{EventSegment, MessageHeader, MessageType, PatientSegment};
pub use crate::session::{send_and_receive, Session};
