//! JSON-file-backed alert record store.
//!
//! One small file holds every record ever written, rewritten in full on
//! each mutation. Alert volume is tiny (these are emergencies) and the
//! whole-file write keeps the durable copy readable with any text editor,
//! which matters when the record is being recovered from a damaged
//! device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use thiserror::Error;

use crate::alert::{Alert, AlertId};
use crate::records::types::{AlertRecord, RecordStatus, MAX_DISPATCH_ATTEMPTS};

/// Error type for record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("record not found: {0}")]
    NotFound(AlertId),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to the record store.
pub type SharedRecordStore = std::sync::Arc<AlertRecordStore>;

/// Durable at-least-once store for every alert ever raised.
///
/// Every mutation writes through to disk before returning, so a crash
/// immediately after `store` still leaves a `Pending` record for the
/// next start to redeliver.
pub struct AlertRecordStore {
    records: RwLock<HashMap<AlertId, AlertRecord>>,
    path: PathBuf,
}

impl AlertRecordStore {
    /// Open the store at the given path, loading any existing records.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let list: Vec<AlertRecord> = serde_json::from_str(&json)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            list.into_iter().map(|r| (r.id, r)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            path,
        })
    }

    /// Create a shared reference to this store.
    pub fn shared(self) -> SharedRecordStore {
        std::sync::Arc::new(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the durable record for an alert, status `Pending`.
    ///
    /// Always called before the first dispatch attempt.
    pub fn store(&self, alert: &Alert) -> StoreResult<AlertId> {
        let record = AlertRecord::from_alert(alert);
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        records.insert(record.id, record);
        self.persist(&records)?;
        tracing::debug!(alert_id = %alert.id, "alert record stored as pending");
        Ok(alert.id)
    }

    pub fn get(&self, id: AlertId) -> StoreResult<AlertRecord> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        records.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Records still awaiting a first successful delivery, oldest first.
    pub fn get_pending(&self) -> StoreResult<Vec<AlertRecord>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut pending: Vec<AlertRecord> = records
            .values()
            .filter(|r| r.status == RecordStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    /// Every record, oldest first.
    pub fn history(&self) -> StoreResult<Vec<AlertRecord>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut all: Vec<AlertRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }

    /// Mark a record delivered. Called once at least one channel reports
    /// success; an acknowledged record is left as is.
    pub fn mark_sent(&self, id: AlertId) -> StoreResult<()> {
        self.update(id, |record| {
            if record.status != RecordStatus::Acknowledged {
                record.status = RecordStatus::Sent;
            }
        })
    }

    /// Mark a record acknowledged by a human. Terminal.
    pub fn mark_acknowledged(&self, id: AlertId) -> StoreResult<()> {
        self.update(id, |record| {
            record.status = RecordStatus::Acknowledged;
        })
    }

    /// Count one more failed delivery attempt; parks the record as
    /// `Failed` once the cap is reached. Returns the new attempt count.
    pub fn increment_retry(&self, id: AlertId) -> StoreResult<u32> {
        let mut count = 0;
        self.update(id, |record| {
            record.retry_count += 1;
            count = record.retry_count;
            if record.status == RecordStatus::Pending && record.retry_count >= MAX_DISPATCH_ATTEMPTS
            {
                record.status = RecordStatus::Failed;
                tracing::warn!(
                    alert_id = %record.id,
                    attempts = record.retry_count,
                    "dispatch retry cap reached, record parked as failed"
                );
            }
        })?;
        Ok(count)
    }

    pub fn len(&self) -> StoreResult<usize> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn update(&self, id: AlertId, mutate: impl FnOnce(&mut AlertRecord)) -> StoreResult<()> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        mutate(record);
        record.updated_at = Utc::now();
        self.persist(&records)
    }

    fn persist(&self, records: &HashMap<AlertId, AlertRecord>) -> StoreResult<()> {
        let mut list: Vec<&AlertRecord> = records.values().collect();
        list.sort_by_key(|r| r.created_at);
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Drop emergency breadcrumb files into every configured directory.
///
/// Used at the highest escalation level so a record of the emergency
/// survives even destructive failure of the primary device. Each write
/// is independent; a failed directory is logged and skipped. Returns how
/// many breadcrumbs landed.
pub fn write_breadcrumbs(alert: &Alert, dirs: &[PathBuf]) -> usize {
    let breadcrumb = serde_json::json!({
        "alert_id": alert.id,
        "kind": alert.kind,
        "message": alert.message,
        "location": alert.location_text(),
        "created_at": alert.created_at.to_rfc3339(),
        "written_at": Utc::now().to_rfc3339(),
    });
    let json = match serde_json::to_string_pretty(&breadcrumb) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "breadcrumb serialization failed");
            return 0;
        }
    };

    let mut written = 0;
    for dir in dirs {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "breadcrumb directory unavailable");
            continue;
        }
        let path = dir.join(format!("vigil-emergency-{}.json", alert.id));
        match std::fs::write(&path, &json) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "breadcrumb written");
                written += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "breadcrumb write failed");
            }
        }
    }
    written
}
