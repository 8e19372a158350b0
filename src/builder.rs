//! Assembles outbound ADT messages from a patient record.

use crate::codec::{AdtBody, AdtMessage, ADMISSION_EVENT, ADT, DISCHARGE_EVENT};
use crate::directory::PatientRecord;
use crate::segment::{EventSegment, MessageHeader, MessageType, PatientSegment};
use chrono::{Local, NaiveDateTime, SubsecRound};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Static sender/receiver names written into MSH-3 to MSH-6, plus the processing id (MSH-11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub processing_id: String,
}

impl Default for Routing {
    fn default() -> Self {
        Routing {
            sending_application: "RECEPTION".to_owned(),
            sending_facility: "HOSPITAL".to_owned(),
            receiving_application: "HIS".to_owned(),
            receiving_facility: "HOSPITAL".to_owned(),
            processing_id: "P".to_owned(),
        }
    }
}

impl Routing {
    /// The same two parties seen from the other end, used for the acknowledgment header.
    pub fn reversed(&self) -> Routing {
        Routing {
            sending_application: self.receiving_application.clone(),
            sending_facility: self.receiving_facility.clone(),
            receiving_application: self.sending_application.clone(),
            receiving_facility: self.sending_facility.clone(),
            processing_id: self.processing_id.clone(),
        }
    }

    /// A header for `message_type` with a fresh control id and the current time.
    pub fn header(&self, message_type: MessageType) -> MessageHeader {
        MessageHeader {
            message_type,
            sending_application: self.sending_application.clone(),
            sending_facility: self.sending_facility.clone(),
            receiving_application: self.receiving_application.clone(),
            receiving_facility: self.receiving_facility.clone(),
            control_id: next_control_id(),
            timestamp: now(),
            processing_id: self.processing_id.clone(),
        }
    }
}

/// A control id never handed out before by this process.
///
/// The millisecond clock at first use is the prefix, followed by a process-wide counter.
pub fn next_control_id() -> String {
    static PREFIX: OnceLock<u128> = OnceLock::new();
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let prefix = PREFIX.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
    });
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{:06}", prefix, sequence)
}

/// Local wall-clock time at the one second precision the wire carries.
pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/// ADT^A01 for a newly registered patient.
///
/// No validation happens here. A receiver only accepts the message when both names are
/// non-empty and the date of birth falls in years 0 to 9999, since PID-5 needs both
/// components and PID-7 is a fixed eight-digit date.
pub fn build_admission(patient: &PatientRecord, routing: &Routing) -> AdtMessage {
    AdtMessage::Admission(build_body(ADMISSION_EVENT, patient, routing))
}

/// ADT^A03 for a patient leaving. The record has the same limits as for [`build_admission`].
pub fn build_discharge(patient: &PatientRecord, routing: &Routing) -> AdtMessage {
    AdtMessage::Discharge(build_body(DISCHARGE_EVENT, patient, routing))
}

fn build_body(trigger_event: &str, patient: &PatientRecord, routing: &Routing) -> AdtBody {
    let header = routing.header(MessageType::new(ADT, trigger_event));
    let event = EventSegment {
        event_type: trigger_event.to_owned(),
        recorded_at: header.timestamp,
    };

    AdtBody {
        header,
        event,
        patient: PatientSegment {
            patient_id: patient.id,
            family_name: patient.last_name.clone(),
            given_name: patient.first_name.clone(),
            date_of_birth: patient.date_of_birth,
        },
    }
}
