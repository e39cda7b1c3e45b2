//! Entry ledger - per-date, per-habit completion records

use crate::error::{HabitError, Result};
use crate::habits::Habit;
use crate::store::{keys, LocalStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Date format of ledger keys
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Completion state of one habit on one day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitEntry {
    pub done: bool,
    pub text: String,
}

impl HabitEntry {
    pub fn new(done: bool, text: impl Into<String>) -> Self {
        Self {
            done,
            text: text.into(),
        }
    }
}

/// Habit id -> entry for a single day. A missing habit reads as
/// `HabitEntry::default()`.
pub type DayRecord = BTreeMap<String, HabitEntry>;

/// Date (`YYYY-MM-DD`) -> day record
pub type EntryLedger = BTreeMap<String, DayRecord>;

/// Parse a `YYYY-MM-DD` key, rejecting anything that does not format back
/// to the same string.
pub fn parse_day(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DAY_FORMAT)
        .ok()
        .filter(|d| d.format(DAY_FORMAT).to_string() == date)
        .ok_or_else(|| {
            HabitError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", date))
        })
}

pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Entry of `habit_id` on `day`, defaulted when absent
pub fn entry_for(day: &DayRecord, habit_id: &str) -> HabitEntry {
    day.get(habit_id).cloned().unwrap_or_default()
}

fn decode_entry(raw: &Value) -> HabitEntry {
    HabitEntry {
        done: raw.get("done").and_then(Value::as_bool).unwrap_or(false),
        text: raw
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Decode a day record, defaulting malformed habit entries
pub fn decode_day(raw: &Value) -> DayRecord {
    raw.as_object()
        .map(|obj| {
            obj.iter()
                .map(|(id, entry)| (id.clone(), decode_entry(entry)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a whole ledger; anything but a JSON object decodes to empty
pub fn decode_ledger(raw: &Value) -> EntryLedger {
    raw.as_object()
        .map(|obj| {
            obj.iter()
                .map(|(date, day)| (date.clone(), decode_day(day)))
                .collect()
        })
        .unwrap_or_default()
}

/// Give every registered habit an entry in `day`, defaulting the missing
/// ones. Entries for unregistered ids are left alone.
pub fn reconcile_day(day: &mut DayRecord, habits: &[Habit]) {
    for habit in habits {
        day.entry(habit.id.clone()).or_default();
    }
}

/// Persisted entry ledger
#[derive(Clone)]
pub struct Ledger {
    store: LocalStore,
}

impl Ledger {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> EntryLedger {
        self.store
            .load_raw(keys::ENTRIES)
            .map(|raw| decode_ledger(&raw))
            .unwrap_or_default()
    }

    pub fn set(&self, ledger: &EntryLedger) {
        self.store.save(keys::ENTRIES, ledger);
    }

    /// Record for `date`, empty when nothing was saved that day
    pub fn day(&self, date: &str) -> DayRecord {
        self.get().remove(date).unwrap_or_default()
    }

    /// Overwrite a single date
    pub fn put_day(&self, date: &str, day: DayRecord) {
        let mut ledger = self.get();
        ledger.insert(date.to_string(), day);
        self.set(&ledger);
    }

    /// Apply `patch` to the record for `date`, then reconcile it against
    /// the registered habits so every habit has a row. Returns the stored
    /// record.
    pub fn upsert_day(&self, date: &str, patch: &DayRecord, habits: &[Habit]) -> Result<DayRecord> {
        parse_day(date)?;

        let mut ledger = self.get();
        let day = ledger.entry(date.to_string()).or_default();
        for (habit_id, entry) in patch {
            day.insert(habit_id.clone(), entry.clone());
        }
        reconcile_day(day, habits);

        let saved = day.clone();
        self.set(&ledger);
        log::debug!("Saved {} entries for {}", saved.len(), date);
        Ok(saved)
    }
}
