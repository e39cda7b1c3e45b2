//! Tracker facade
//!
//! Wires the local store, registry, ledger, access gate and sync engine
//! together. Every user action writes locally first and then tries the
//! remote on a best-effort basis; the outcome comes back as a
//! [`StatusMessage`] instead of an error.

use crate::access::AccessGate;
use crate::backup::{self, ImportSummary};
use crate::config::{AppConfig, SyncSettings};
use crate::entries::{parse_day, reconcile_day, DayRecord, Ledger};
use crate::error::{HabitError, Result};
use crate::habits::{Habit, HabitRegistry};
use crate::remote::{Connector, HttpConnector, Identity};
use crate::report::{build_report, DateRange, Report};
use crate::store::LocalStore;
use crate::sync::SyncEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Failure,
}

/// User-facing outcome of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Success,
            text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Failure,
            text: text.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == StatusKind::Failure
    }
}

impl std::fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

pub struct Tracker {
    config: AppConfig,
    store: LocalStore,
    registry: HabitRegistry,
    ledger: Ledger,
    access: AccessGate,
    engine: Arc<SyncEngine>,
}

impl Tracker {
    /// Open the store under `config.data_dir` and talk HTTP to the remote
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = LocalStore::open_in_dir(&config.data_dir)?;
        let connector = Arc::new(HttpConnector::new(config.remote_timeout()));
        Ok(Self::with_connector(config, store, connector))
    }

    pub fn with_connector(
        config: AppConfig,
        store: LocalStore,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let engine = SyncEngine::new(store.clone(), connector);
        Self::with_engine(config, store, engine)
    }

    /// Use a prepared engine, e.g. one with an event callback installed
    pub fn with_engine(config: AppConfig, store: LocalStore, engine: SyncEngine) -> Self {
        Self {
            registry: HabitRegistry::new(store.clone()),
            ledger: Ledger::new(store.clone()),
            access: AccessGate::new(store.clone(), config.session_duration()),
            engine: Arc::new(engine),
            store,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn access(&self) -> &AccessGate {
        &self.access
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn habits(&self) -> Vec<Habit> {
        self.registry.get()
    }

    /// Record for `date` with a row for every registered habit. Nothing is
    /// written.
    pub fn day(&self, date: &str) -> Result<DayRecord> {
        parse_day(date)?;
        let mut day = self.ledger.day(date);
        reconcile_day(&mut day, &self.registry.get());
        Ok(day)
    }

    pub fn pending_days(&self) -> Vec<String> {
        self.engine.pending().list()
    }

    /// Save a day locally, queue it, then try to flush the queue
    pub async fn save_day(&self, date: &str, patch: &DayRecord) -> Result<StatusMessage> {
        self.ledger.upsert_day(date, patch, &self.registry.get())?;
        self.engine.pending().add(date);

        if !self.engine.is_configured() {
            return Ok(StatusMessage::info(format!("Saved {} locally", date)));
        }

        let status = match self.engine.flush_pending().await {
            Ok(report) if report.is_clean() => {
                StatusMessage::success(format!("Saved and synced {}", date))
            }
            Ok(report) => {
                let reason = report
                    .failed
                    .first()
                    .map(|(_, error)| error.as_str())
                    .unwrap_or_default();
                StatusMessage::failure(format!(
                    "Saved {} locally; sync failed ({} days pending): {}",
                    date,
                    report.failed.len(),
                    reason
                ))
            }
            Err(e) => StatusMessage::failure(format!("Saved {} locally; sync failed: {}", date, e)),
        };
        Ok(status)
    }

    pub async fn add_habit(
        &self,
        name: &str,
        has_text: bool,
        text_label: &str,
    ) -> Result<(Habit, StatusMessage)> {
        let habit = self.registry.add(name, has_text, text_label)?;
        let status = self.push_habits(format!("Added habit '{}'", habit.name)).await;
        Ok((habit, status))
    }

    /// Remove a habit from the registry. Its recorded entries stay in the
    /// ledger.
    pub async fn delete_habit(&self, id: &str) -> Result<(Habit, StatusMessage)> {
        let habit = self.registry.remove(id)?;
        let status = self.push_habits(format!("Removed habit '{}'", habit.name)).await;
        Ok((habit, status))
    }

    async fn push_habits(&self, done: String) -> StatusMessage {
        if !self.engine.is_configured() {
            return StatusMessage::info(done);
        }
        let result = match self.engine.initialize().await {
            Ok(_) => self.engine.push_habits().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => StatusMessage::success(format!("{} and synced", done)),
            Err(e) => {
                log::warn!("Habit push failed: {}", e);
                StatusMessage::failure(format!("{}; sync failed: {}", done, e))
            }
        }
    }

    pub async fn sync_now(&self) -> StatusMessage {
        if !self.engine.is_configured() {
            return StatusMessage::info("Cloud sync is not configured");
        }
        match self.engine.sync_now().await {
            Ok(report) if report.flush.is_clean() => StatusMessage::success(format!(
                "Synced: {} pushed, {} pulled",
                report.flush.pushed.len(),
                report.pull.days
            )),
            Ok(report) => StatusMessage::failure(format!(
                "Synced with errors: {} days still pending",
                report.flush.failed.len()
            )),
            Err(e) => StatusMessage::failure(format!("Sync failed: {}", e)),
        }
    }

    /// Store new sync settings. The remote configuration text must parse.
    pub fn configure_remote(&self, settings: SyncSettings) -> Result<()> {
        settings.remote_config()?;
        settings.save(&self.store);
        self.engine.reset();
        Ok(())
    }

    pub fn clear_remote(&self) {
        SyncSettings::clear(&self.store);
        self.engine.reset();
    }

    pub fn sync_settings(&self) -> Option<SyncSettings> {
        SyncSettings::load(&self.store)
    }

    pub async fn sign_in(&self) -> Result<Identity> {
        self.engine.sign_in_with_email().await
    }

    pub async fn sign_up(&self) -> Result<Identity> {
        self.engine.create_account().await
    }

    pub async fn sign_out(&self) -> Result<()> {
        match self.engine.sign_out().await {
            Err(HabitError::RemoteNotInitialized) => Ok(()),
            other => other,
        }
    }

    pub fn export_backup(&self) -> Result<String> {
        backup::export_json(&self.store)
    }

    pub fn import_backup(&self, text: &str) -> Result<ImportSummary> {
        let summary = backup::import_json(&self.store, text)?;
        if summary.config {
            self.engine.reset();
        }
        Ok(summary)
    }

    pub fn report(&self, range: DateRange) -> Report {
        build_report(&self.registry.get(), &self.ledger.get(), range)
    }

    /// Flush the pending queue every time `online` flips back to `true`
    pub fn watch_connectivity(&self, online: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = self.engine.clone();
        tokio::spawn(async move { engine.watch_connectivity(online).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::HabitEntry;
    use crate::remote::{paths, MemoryConnector, MemoryRemote};

    fn tracker() -> (Tracker, Arc<MemoryConnector>) {
        let store = LocalStore::in_memory().unwrap();
        let connector = Arc::new(MemoryConnector::new(Arc::new(MemoryRemote::new())));
        let tracker = Tracker::with_connector(AppConfig::default(), store, connector.clone());
        (tracker, connector)
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            remote_config_text: r#"{"apiKey":"k","projectId":"p"}"#.to_string(),
            ..SyncSettings::default()
        }
    }

    fn done(habit: &str) -> DayRecord {
        DayRecord::from([(habit.to_string(), HabitEntry::new(true, ""))])
    }

    #[tokio::test]
    async fn test_save_day_unconfigured_stays_local() {
        let (tracker, connector) = tracker();

        let status = tracker.save_day("2024-01-05", &done("exercise")).await.unwrap();
        assert_eq!(status.kind, StatusKind::Info);
        assert_eq!(tracker.pending_days(), vec!["2024-01-05"]);
        assert_eq!(connector.connect_count(), 0);
        assert_eq!(connector.remote().request_count(), 0);

        let day = tracker.day("2024-01-05").unwrap();
        assert!(day["exercise"].done);
        assert_eq!(day.len(), tracker.habits().len());
    }

    #[tokio::test]
    async fn test_save_day_syncs_when_configured() {
        let (tracker, connector) = tracker();
        tracker.configure_remote(settings()).unwrap();

        let status = tracker.save_day("2024-01-05", &done("exercise")).await.unwrap();
        assert_eq!(status.kind, StatusKind::Success);
        assert!(tracker.pending_days().is_empty());

        let uid = tracker.engine().identity().unwrap().uid;
        let doc = connector.remote().document(&paths::day(&uid, "2024-01-05")).unwrap();
        assert_eq!(doc["day"]["exercise"]["done"], true);
    }

    #[tokio::test]
    async fn test_save_day_offline_keeps_queue() {
        let (tracker, connector) = tracker();
        tracker.configure_remote(settings()).unwrap();
        connector.remote().set_offline(true);

        let status = tracker.save_day("2024-01-05", &done("exercise")).await.unwrap();
        assert!(status.is_failure());
        assert_eq!(tracker.pending_days(), vec!["2024-01-05"]);
        assert!(tracker.day("2024-01-05").unwrap()["exercise"].done);
    }

    #[tokio::test]
    async fn test_save_day_rejects_bad_date() {
        let (tracker, _) = tracker();
        let result = tracker.save_day("2024-13-01", &done("exercise")).await;
        assert!(matches!(result, Err(HabitError::Validation(_))));
        assert!(tracker.pending_days().is_empty());
    }

    #[tokio::test]
    async fn test_delete_habit_pushes_registry() {
        let (tracker, connector) = tracker();
        tracker.configure_remote(settings()).unwrap();

        let (removed, status) = tracker.delete_habit("water").await.unwrap();
        assert_eq!(removed.id, "water");
        assert_eq!(status.kind, StatusKind::Success);

        let uid = tracker.engine().identity().unwrap().uid;
        let doc = connector.remote().document(&paths::habits(&uid)).unwrap();
        let ids: Vec<&str> = doc["habits"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|h| h["id"].as_str())
            .collect();
        assert!(!ids.contains(&"water"));
    }

    #[tokio::test]
    async fn test_add_habit_offline_is_still_saved() {
        let (tracker, connector) = tracker();
        tracker.configure_remote(settings()).unwrap();
        connector.remote().set_offline(true);

        let (habit, status) = tracker.add_habit("Stretch", true, "Minutes").await.unwrap();
        assert!(status.is_failure());
        assert_eq!(habit.id, "stretch");
        assert!(tracker.habits().iter().any(|h| h.id == "stretch"));
    }

    #[tokio::test]
    async fn test_sync_now_unconfigured() {
        let (tracker, connector) = tracker();
        let status = tracker.sync_now().await;
        assert_eq!(status.kind, StatusKind::Info);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_configure_remote_validates_and_resets() {
        let (tracker, connector) = tracker();

        let bad = SyncSettings {
            remote_config_text: "{not json".to_string(),
            ..SyncSettings::default()
        };
        assert!(tracker.configure_remote(bad).is_err());
        assert!(tracker.sync_settings().is_none());

        tracker.configure_remote(settings()).unwrap();
        assert!(!tracker.sync_now().await.is_failure());
        tracker.configure_remote(settings()).unwrap();
        assert!(!tracker.sync_now().await.is_failure());
        assert_eq!(connector.connect_count(), 2);

        tracker.clear_remote();
        assert!(tracker.sync_settings().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_before_connect_is_ok() {
        let (tracker, _) = tracker();
        tracker.configure_remote(settings()).unwrap();
        assert!(tracker.sign_out().await.is_ok());
    }
}
