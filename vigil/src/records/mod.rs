//! Durable, at-least-once alert records.
//!
//! Every alert, whatever raised it, is written here with status
//! `Pending` before the first dispatch attempt. The store is the one
//! contract that must survive process restarts; the escalation
//! controller's in-memory state does not.

pub mod store;
pub mod types;

pub use store::{
    write_breadcrumbs, AlertRecordStore, SharedRecordStore, StoreError, StoreResult,
};
pub use types::{AlertRecord, RecordStatus, MAX_DISPATCH_ATTEMPTS};
