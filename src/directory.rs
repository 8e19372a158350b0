//! The patient directory the sink system mutates, and the observers told about every change.
//!
//! Both are capabilities handed to the [`crate::Router`]; the protocol core only relies on each
//! `upsert`/`remove` being atomic on its own.

use crate::error::DirectoryError;
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Numeric patient identifier assigned by the source system.
pub type PatientId = u64;

/// A patient as held by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub id: PatientId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
}

impl PatientRecord {
    pub fn new(
        id: PatientId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        date_of_birth: NaiveDate,
    ) -> Self {
        PatientRecord {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            date_of_birth,
        }
    }
}

/// Keyed patient store. Implementations provide their own locking.
pub trait PatientDirectory: Send + Sync {
    /// Inserts the record, replacing any record with the same id.
    fn upsert(&self, record: PatientRecord) -> Result<(), DirectoryError>;

    /// Removes the record with this id. Removing an unknown id succeeds.
    fn remove(&self, id: PatientId) -> Result<(), DirectoryError>;

    /// Every record, ordered by id.
    fn list_all(&self) -> Result<Vec<PatientRecord>, DirectoryError>;
}

/// Told about the full directory contents after every mutation.
pub trait DirectoryObserver: Send + Sync {
    fn on_directory_changed(&self, snapshot: &[PatientRecord]);
}

/// In-process directory behind a read/write lock.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    records: RwLock<BTreeMap<PatientId, PatientRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory::default()
    }

    pub fn get(&self, id: PatientId) -> Result<Option<PatientRecord>, DirectoryError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> DirectoryError {
    DirectoryError("patient directory lock poisoned".to_owned())
}

impl PatientDirectory for MemoryDirectory {
    fn upsert(&self, record: PatientRecord) -> Result<(), DirectoryError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record);
        Ok(())
    }

    fn remove(&self, id: PatientId) -> Result<(), DirectoryError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.remove(&id).is_none() {
            debug!("Patient {} not in directory, nothing to remove", id);
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<PatientRecord>, DirectoryError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }
}

/// Republishes every snapshot on a broadcast channel for the real-time subscribers.
#[derive(Debug, Clone)]
pub struct SnapshotBroadcaster {
    sender: broadcast::Sender<Vec<PatientRecord>>,
}

impl SnapshotBroadcaster {
    /// `capacity` snapshots are retained for slow subscribers before they start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        SnapshotBroadcaster { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<PatientRecord>> {
        self.sender.subscribe()
    }
}

impl DirectoryObserver for SnapshotBroadcaster {
    fn on_directory_changed(&self, snapshot: &[PatientRecord]) {
        // an error only means nobody is listening right now
        match self.sender.send(snapshot.to_vec()) {
            Ok(subscribers) => info!(
                "Published patient list ({} patients) to {} subscribers",
                snapshot.len(),
                subscribers
            ),
            Err(_) => debug!("No subscribers for patient list update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: PatientId, first: &str, last: &str) -> PatientRecord {
        PatientRecord::new(id, first, last, NaiveDate::from_ymd_opt(1990, 5, 1).unwrap())
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let directory = MemoryDirectory::new();
        directory.upsert(patient(42, "Ivan", "Petrov")).unwrap();
        directory.upsert(patient(42, "Ivan", "Sidorov")).unwrap();

        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(42).unwrap().unwrap().last_name, "Sidorov");
    }

    #[test]
    fn list_all_is_ordered_by_id() {
        let directory = MemoryDirectory::new();
        directory.upsert(patient(7, "Anna", "Ivanova")).unwrap();
        directory.upsert(patient(3, "Oleg", "Smirnov")).unwrap();
        directory.upsert(patient(42, "Ivan", "Petrov")).unwrap();

        let ids: Vec<PatientId> = directory.list_all().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 7, 42]);
    }

    #[test]
    fn removing_unknown_id_is_not_an_error() {
        let directory = MemoryDirectory::new();
        directory.upsert(patient(1, "Anna", "Ivanova")).unwrap();

        directory.remove(99).unwrap();
        assert_eq!(directory.len(), 1);

        directory.remove(1).unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn broadcaster_delivers_snapshot_to_subscribers() {
        let broadcaster = SnapshotBroadcaster::new(4);
        let mut receiver = broadcaster.subscribe();

        broadcaster.on_directory_changed(&[patient(42, "Ivan", "Petrov")]);

        let snapshot = receiver.try_recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 42);
    }

    #[test]
    fn broadcaster_without_subscribers_does_not_fail() {
        let broadcaster = SnapshotBroadcaster::new(4);
        broadcaster.on_directory_changed(&[]);
    }
}
