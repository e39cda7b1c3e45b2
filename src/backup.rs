//! Backup export and import
//!
//! A backup is a single JSON object:
//!
//! ```json
//! { "habits": [...], "entries": {...}, "config": {...}, "exportedAt": "2024-01-05T10:00:00Z" }
//! ```
//!
//! Import overwrites each of `habits`, `entries` and `config` that the file
//! contains and leaves the others alone. The file is decoded completely
//! before anything is written.

use crate::config::SyncSettings;
use crate::entries::{decode_ledger, EntryLedger, Ledger};
use crate::error::{HabitError, Result};
use crate::habits::{normalize, Habit, HabitRegistry};
use crate::store::{keys, LocalStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub habits: Vec<Habit>,
    pub entries: EntryLedger,
    pub config: SyncSettings,
    pub exported_at: String,
}

/// What an import replaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub habits: Option<usize>,
    pub days: Option<usize>,
    pub config: bool,
}

impl ImportSummary {
    pub fn is_empty(&self) -> bool {
        self.habits.is_none() && self.days.is_none() && !self.config
    }
}

pub fn export(store: &LocalStore) -> Backup {
    Backup {
        habits: HabitRegistry::new(store.clone()).get(),
        entries: Ledger::new(store.clone()).get(),
        config: store.load(keys::SYNC_CONFIG, SyncSettings::default()),
        exported_at: Utc::now().to_rfc3339(),
    }
}

pub fn export_json(store: &LocalStore) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export(store))?)
}

fn present<'a>(root: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    root.get(key).filter(|v| !v.is_null())
}

pub fn import_json(store: &LocalStore, text: &str) -> Result<ImportSummary> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| HabitError::Validation(format!("Backup is not valid JSON: {}", e)))?;
    let root = root
        .as_object()
        .ok_or_else(|| HabitError::Validation("Backup must be a JSON object".to_string()))?;

    let habits = present(root, "habits").map(normalize);
    let entries = match present(root, "entries") {
        Some(raw) if raw.is_object() => Some(decode_ledger(raw)),
        Some(_) => {
            return Err(HabitError::Validation(
                "Backup entries must be an object keyed by date".to_string(),
            ))
        }
        None => None,
    };
    let config = present(root, "config")
        .map(|raw| {
            serde_json::from_value::<SyncSettings>(raw.clone())
                .map_err(|e| HabitError::Validation(format!("Backup config is invalid: {}", e)))
        })
        .transpose()?;

    let mut summary = ImportSummary::default();
    if let Some(habits) = habits {
        summary.habits = Some(HabitRegistry::new(store.clone()).set(&habits).len());
    }
    if let Some(entries) = entries {
        Ledger::new(store.clone()).set(&entries);
        summary.days = Some(entries.len());
    }
    if let Some(config) = config {
        config.save(store);
        summary.config = true;
    }

    log::info!("Imported backup: {:?}", summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{DayRecord, HabitEntry};
    use serde_json::json;

    fn seeded() -> LocalStore {
        let store = LocalStore::in_memory().unwrap();
        HabitRegistry::new(store.clone()).set(&[Habit::new("exercise", "Exercise")]);
        Ledger::new(store.clone()).put_day(
            "2024-01-05",
            DayRecord::from([("exercise".to_string(), HabitEntry::new(true, "20"))]),
        );
        store
    }

    #[test]
    fn test_export_shape() {
        let store = seeded();
        let exported: Value = serde_json::from_str(&export_json(&store).unwrap()).unwrap();

        assert_eq!(exported["habits"][0]["id"], "exercise");
        assert_eq!(exported["entries"]["2024-01-05"]["exercise"]["text"], "20");
        assert!(exported["config"].is_object());
        assert!(exported["exportedAt"].is_string());
    }

    #[test]
    fn test_import_habits_only_keeps_entries() {
        let store = seeded();
        let before = Ledger::new(store.clone()).get();

        let summary = import_json(&store, r#"{"habits":[{"id":"read","name":"Read"}]}"#).unwrap();
        assert_eq!(summary.habits, Some(1));
        assert_eq!(summary.days, None);

        assert_eq!(Ledger::new(store.clone()).get(), before);
        assert_eq!(HabitRegistry::new(store).get(), vec![Habit::new("read", "Read")]);
    }

    #[test]
    fn test_import_roundtrip_of_export() {
        let source = seeded();
        let text = export_json(&source).unwrap();

        let target = LocalStore::in_memory().unwrap();
        let summary = import_json(&target, &text).unwrap();
        assert!(summary.config);
        assert_eq!(Ledger::new(target.clone()).get(), Ledger::new(source).get());
    }

    #[test]
    fn test_import_rejects_bad_files_without_writing() {
        let store = seeded();
        let before = Ledger::new(store.clone()).get();

        assert!(matches!(import_json(&store, "[1,2]"), Err(HabitError::Validation(_))));
        assert!(matches!(import_json(&store, "nope"), Err(HabitError::Validation(_))));
        assert!(matches!(
            import_json(&store, &json!({"habits": [], "entries": [1]}).to_string()),
            Err(HabitError::Validation(_))
        ));

        assert_eq!(Ledger::new(store.clone()).get(), before);
        assert_eq!(HabitRegistry::new(store).get(), vec![Habit::new("exercise", "Exercise")]);
    }

    #[test]
    fn test_empty_object_imports_nothing() {
        let store = seeded();
        assert!(import_json(&store, "{}").unwrap().is_empty());
    }
}
