//! Turns a decoded ADT message into the directory change it implies, and applies it.

use crate::codec::AdtMessage;
use crate::directory::{DirectoryObserver, PatientDirectory, PatientId, PatientRecord};
use crate::error::DispatchError;
use log::info;
use std::sync::{Arc, Mutex, PoisonError};

/// The change a message asks of the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryMutation {
    Upsert(PatientRecord),
    Remove(PatientId),
}

impl DirectoryMutation {
    /// Admission upserts, discharge removes, anything else is unsupported.
    pub fn for_message(message: &AdtMessage) -> Result<Self, DispatchError> {
        match message {
            AdtMessage::Admission(body) => Ok(DirectoryMutation::Upsert(PatientRecord::new(
                body.patient.patient_id,
                body.patient.given_name.clone(),
                body.patient.family_name.clone(),
                body.patient.date_of_birth,
            ))),
            AdtMessage::Discharge(body) => Ok(DirectoryMutation::Remove(body.patient.patient_id)),
            AdtMessage::Unsupported(header) => Err(DispatchError::UnsupportedType(
                header.message_type.to_string(),
            )),
        }
    }
}

/// Applies messages to the directory and notifies the observer before returning.
///
/// Dispatches are serialized, so observers see snapshots in the order the mutations landed.
pub struct Router {
    directory: Arc<dyn PatientDirectory>,
    observer: Arc<dyn DirectoryObserver>,
    publishing: Mutex<()>,
}

impl Router {
    pub fn new(directory: Arc<dyn PatientDirectory>, observer: Arc<dyn DirectoryObserver>) -> Self {
        Router {
            directory,
            observer,
            publishing: Mutex::new(()),
        }
    }

    /// Applies `message`. On `Ok` the directory has been mutated and the observer called
    /// exactly once.
    ///
    /// Discharging an id the directory does not hold succeeds, so duplicate discharges are
    /// harmless.
    pub fn dispatch(&self, message: &AdtMessage) -> Result<DirectoryMutation, DispatchError> {
        let mutation = DirectoryMutation::for_message(message)?;

        // the guard holds no data, a panic elsewhere leaves nothing inconsistent
        let _publishing = self
            .publishing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match &mutation {
            DirectoryMutation::Upsert(record) => {
                self.directory.upsert(record.clone())?;
                info!(
                    "Patient admitted: {} {} (id {})",
                    record.first_name, record.last_name, record.id
                );
            }
            DirectoryMutation::Remove(id) => {
                self.directory.remove(*id)?;
                info!("Patient discharged (id {})", id);
            }
        }

        let snapshot = self.directory.list_all()?;
        self.observer.on_directory_changed(&snapshot);

        Ok(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_admission, build_discharge, Routing};
    use crate::directory::MemoryDirectory;
    use crate::error::DirectoryError;
    use crate::segment::{MessageHeader, MessageType};
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<Vec<PatientId>>>,
    }

    impl DirectoryObserver for Recorder {
        fn on_directory_changed(&self, snapshot: &[PatientRecord]) {
            self.snapshots
                .lock()
                .unwrap()
                .push(snapshot.iter().map(|p| p.id).collect());
        }
    }

    struct Unavailable;

    impl PatientDirectory for Unavailable {
        fn upsert(&self, _: PatientRecord) -> Result<(), DirectoryError> {
            Err(DirectoryError("store offline".into()))
        }
        fn remove(&self, _: PatientId) -> Result<(), DirectoryError> {
            Err(DirectoryError("store offline".into()))
        }
        fn list_all(&self) -> Result<Vec<PatientRecord>, DirectoryError> {
            Err(DirectoryError("store offline".into()))
        }
    }

    fn ivan() -> PatientRecord {
        PatientRecord::new(42, "Ivan", "Petrov", NaiveDate::from_ymd_opt(1990, 5, 1).unwrap())
    }

    fn setup() -> (Arc<MemoryDirectory>, Arc<Recorder>, Router) {
        let directory = Arc::new(MemoryDirectory::new());
        let recorder = Arc::new(Recorder::default());
        let router = Router::new(directory.clone(), recorder.clone());
        (directory, recorder, router)
    }

    #[test]
    fn admission_upserts_and_notifies_once() {
        let (directory, recorder, router) = setup();

        let mutation = router.dispatch(&build_admission(&ivan(), &Routing::default())).unwrap();

        assert_eq!(mutation, DirectoryMutation::Upsert(ivan()));
        assert_eq!(directory.get(42).unwrap(), Some(ivan()));
        assert_eq!(*recorder.snapshots.lock().unwrap(), vec![vec![42]]);
    }

    #[test]
    fn discharge_removes_and_notifies() {
        let (directory, recorder, router) = setup();
        router.dispatch(&build_admission(&ivan(), &Routing::default())).unwrap();

        let mutation = router.dispatch(&build_discharge(&ivan(), &Routing::default())).unwrap();

        assert_eq!(mutation, DirectoryMutation::Remove(42));
        assert!(directory.is_empty());
        assert_eq!(*recorder.snapshots.lock().unwrap(), vec![vec![42], vec![]]);
    }

    #[test]
    fn discharge_of_unknown_patient_is_a_no_op() {
        let (directory, recorder, router) = setup();
        let dob = NaiveDate::from_ymd_opt(1985, 1, 2).unwrap();
        let other = PatientRecord::new(7, "Anna", "Ivanova", dob);
        directory.upsert(other.clone()).unwrap();

        router.dispatch(&build_discharge(&ivan(), &Routing::default())).unwrap();

        assert_eq!(directory.list_all().unwrap(), vec![other]);
        assert_eq!(recorder.snapshots.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsupported_type_is_rejected_without_touching_directory() {
        let (directory, recorder, router) = setup();
        let header: MessageHeader = Routing::default().header(MessageType::new("ADT", "A08"));

        let err = router.dispatch(&AdtMessage::Unsupported(header)).unwrap_err();

        assert!(matches!(err, DispatchError::UnsupportedType(ref t) if t == "ADT^A08"));
        assert!(directory.is_empty());
        assert!(recorder.snapshots.lock().unwrap().is_empty());
    }

    #[test]
    fn last_snapshot_matches_directory_under_concurrency() {
        let (directory, recorder, router) = setup();
        let router = Arc::new(router);

        let workers: Vec<_> = (0..8u64)
            .map(|worker| {
                let router = Arc::clone(&router);
                std::thread::spawn(move || {
                    for round in 0..50u64 {
                        let patient = PatientRecord::new(
                            round % 3,
                            "Ivan",
                            "Petrov",
                            NaiveDate::from_ymd_opt(1990, 5, 1).unwrap(),
                        );
                        let message = if (worker + round) % 2 == 0 {
                            build_admission(&patient, &Routing::default())
                        } else {
                            build_discharge(&patient, &Routing::default())
                        };
                        router.dispatch(&message).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let snapshots = recorder.snapshots.lock().unwrap();
        let current: Vec<PatientId> = directory.list_all().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(snapshots.len(), 400);
        assert_eq!(snapshots.last(), Some(&current));
    }

    #[test]
    fn directory_failure_is_unavailable() {
        let recorder = Arc::new(Recorder::default());
        let router = Router::new(Arc::new(Unavailable), recorder.clone());

        let err = router.dispatch(&build_admission(&ivan(), &Routing::default())).unwrap_err();

        assert!(matches!(err, DispatchError::DirectoryUnavailable(_)));
        assert!(recorder.snapshots.lock().unwrap().is_empty());
    }
}
