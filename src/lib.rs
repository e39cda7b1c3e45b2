//! Habit Ledger - offline-first habit tracker
//!
//! Local store, habit registry, per-day entry ledger, pending push queue
//! and a sync engine that replicates everything to a remote document
//! service when one is configured.

pub mod access;
pub mod app;
pub mod backup;
pub mod config;
pub mod entries;
pub mod error;
pub mod habits;
pub mod pending;
pub mod remote;
pub mod report;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use app::{StatusKind, StatusMessage, Tracker};
pub use config::{AppConfig, RemoteConfig, SyncSettings};
pub use entries::{DayRecord, EntryLedger, HabitEntry};
pub use error::{HabitError, Result};
pub use habits::Habit;
pub use store::LocalStore;
pub use sync::{SyncEngine, SyncEvent, SyncState};
