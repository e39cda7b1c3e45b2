//! Habit registry
//!
//! The registry is the user's list of trackable habits. It is stored as a
//! plain JSON array and every read runs it through [`normalize`], so data
//! edited by hand or written by an older build converges to the canonical
//! form on the first read.

use crate::error::{HabitError, Result};
use crate::store::{keys, LocalStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A trackable habit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    /// Unique slug, e.g. `morning-run`
    pub id: String,
    /// Display name
    pub name: String,
    /// Whether the habit takes a free-text detail per day
    pub has_text: bool,
    /// Label shown next to the detail field
    pub text_label: String,
}

impl Habit {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_text: false,
            text_label: String::new(),
        }
    }

    /// Same habit with a free-text detail field
    pub fn with_text(mut self, label: impl Into<String>) -> Self {
        self.has_text = true;
        self.text_label = label.into();
        self
    }
}

/// Built-in habits used whenever the stored list is empty or unusable
pub fn default_habits() -> Vec<Habit> {
    vec![
        Habit::new("exercise", "Exercise").with_text("Minutes"),
        Habit::new("reading", "Reading").with_text("Pages"),
        Habit::new("water", "Drink water"),
        Habit::new("meditation", "Meditation").with_text("Minutes"),
    ]
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        Some(Value::Null) | None => false,
    }
}

fn normalize_entry(obj: &Map<String, Value>) -> Option<Habit> {
    let id = coerce_string(obj.get("id"));
    let name = coerce_string(obj.get("name"));
    if id.is_empty() || name.is_empty() {
        return None;
    }

    Some(Habit {
        id,
        name,
        has_text: coerce_bool(obj.get("hasText")),
        text_label: coerce_string(obj.get("textLabel")),
    })
}

/// Canonicalize a raw habit list.
///
/// Non-object entries are dropped, fields are coerced to their expected
/// types and trimmed, entries without an id or name are dropped, and a
/// repeated id keeps its first occurrence. Anything that is not an array
/// normalizes to an empty list.
pub fn normalize(raw: &Value) -> Vec<Habit> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(normalize_entry)
        .filter(|habit| seen.insert(habit.id.clone()))
        .collect()
}

/// [`normalize`] for an already typed list
pub fn normalize_habits(habits: &[Habit]) -> Vec<Habit> {
    match serde_json::to_value(habits) {
        Ok(raw) => normalize(&raw),
        Err(_) => Vec::new(),
    }
}

/// Turn a display name into a habit id
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Persisted habit list with self-healing reads
#[derive(Clone)]
pub struct HabitRegistry {
    store: LocalStore,
}

impl HabitRegistry {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Current habits, never empty.
    ///
    /// Writes the normalized list back when the stored value was not already
    /// canonical, and installs [`default_habits`] when nothing usable is
    /// stored.
    pub fn get(&self) -> Vec<Habit> {
        let raw = self.store.load_raw(keys::HABITS).unwrap_or(Value::Null);
        let habits = normalize(&raw);

        if habits.is_empty() {
            let defaults = default_habits();
            log::info!("No usable habits stored, installing {} defaults", defaults.len());
            self.store.save(keys::HABITS, &defaults);
            return defaults;
        }

        let canonical = serde_json::to_value(&habits).unwrap_or(Value::Null);
        if canonical != raw {
            log::info!("Rewriting stored habits in canonical form");
            self.store.save(keys::HABITS, &canonical);
        }

        habits
    }

    /// Replace the whole registry. Returns what was stored.
    pub fn set(&self, habits: &[Habit]) -> Vec<Habit> {
        let habits = normalize_habits(habits);
        self.store.save(keys::HABITS, &habits);
        habits
    }

    /// Replace the whole registry from untyped JSON (backups, remote data)
    pub fn set_raw(&self, raw: &Value) -> Vec<Habit> {
        let habits = normalize(raw);
        self.store.save(keys::HABITS, &habits);
        habits
    }

    pub fn find(&self, id: &str) -> Option<Habit> {
        self.get().into_iter().find(|h| h.id == id)
    }

    /// Append a new habit, deriving its id from the name
    pub fn add(&self, name: &str, has_text: bool, text_label: &str) -> Result<Habit> {
        let name = name.trim();
        let id = slugify(name);
        if name.is_empty() || id.is_empty() {
            return Err(HabitError::Validation(
                "Habit name must contain at least one letter or digit".to_string(),
            ));
        }

        let mut habits = self.get();
        if habits.iter().any(|h| h.id == id) {
            return Err(HabitError::Validation(format!(
                "A habit with id '{}' already exists",
                id
            )));
        }

        let habit = Habit {
            id,
            name: name.to_string(),
            has_text,
            text_label: text_label.trim().to_string(),
        };
        habits.push(habit.clone());
        self.set(&habits);
        log::info!("Added habit '{}'", habit.id);
        Ok(habit)
    }

    /// Remove a habit. Its historical entries stay in the ledger.
    pub fn remove(&self, id: &str) -> Result<Habit> {
        let mut habits = self.get();
        let index = habits
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| HabitError::Validation(format!("Unknown habit '{}'", id)))?;

        let removed = habits.remove(index);
        self.set(&habits);
        log::info!("Removed habit '{}'", removed.id);
        Ok(removed)
    }
}
