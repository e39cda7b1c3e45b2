//! Pending queue - dates whose records are not yet confirmed remotely
//!
//! Persisted as a JSON array; every mutation goes through a `BTreeSet` so
//! the stored sequence stays sorted and free of duplicates. Mutations are
//! read-modify-write without any lock, so two overlapping sync runs can
//! lose an update to the queue.

use crate::store::{keys, LocalStore};
use std::collections::BTreeSet;

#[derive(Clone)]
pub struct PendingQueue {
    store: LocalStore,
}

impl PendingQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    fn load(&self) -> BTreeSet<String> {
        let dates: Vec<String> = self.store.load(keys::PENDING_DAYS, Vec::new());
        dates.into_iter().collect()
    }

    fn save(&self, dates: &BTreeSet<String>) {
        let dates: Vec<&String> = dates.iter().collect();
        self.store.save(keys::PENDING_DAYS, &dates);
    }

    pub fn add(&self, date: &str) {
        let mut dates = self.load();
        if dates.insert(date.to_string()) {
            log::debug!("Queued {} for upload", date);
        }
        self.save(&dates);
    }

    pub fn remove(&self, date: &str) {
        let mut dates = self.load();
        if dates.remove(date) {
            log::debug!("Dequeued {}", date);
        }
        self.save(&dates);
    }

    pub fn list(&self) -> Vec<String> {
        self.load().into_iter().collect()
    }

    pub fn contains(&self, date: &str) -> bool {
        self.load().contains(date)
    }

    pub fn is_empty(&self) -> bool {
        self.load().is_empty()
    }
}
