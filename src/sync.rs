//! Sync engine
//!
//! Replicates the local store to the remote document service.
//!
//! ```text
//!  Unconfigured ──(settings saved)──▶ Initializing ──(connect)──▶ Ready ──(sign in)──▶ Authenticated
//! ```
//!
//! - Without sync settings nothing ever contacts the remote.
//! - The remote client is created once per engine and reused; call
//!   [`SyncEngine::reset`] after the settings change.
//! - Local writes always happen first. Remote failures never touch local
//!   data; a day whose push failed simply stays in the pending queue.
//! - [`SyncEngine::pull_all`] overwrites local days with remote ones without
//!   comparing timestamps, so an edit made after the last successful push
//!   is lost if a pull runs first. [`SyncEngine::sync_now`] flushes before
//!   pulling for that reason.
//! - Overlapping runs are not serialized; they can interleave their
//!   read-modify-write cycles on the pending queue.

use crate::config::SyncSettings;
use crate::entries::{decode_day, parse_day, Ledger};
use crate::error::{HabitError, Result};
use crate::habits::{normalize, HabitRegistry};
use crate::pending::PendingQueue;
use crate::remote::{paths, server_timestamp, Connector, Document, Identity, RemoteStore};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Where the engine stands with the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync settings stored
    Unconfigured,
    /// Settings stored, client not created yet
    Initializing,
    /// Client created, nobody signed in
    Ready,
    /// Client created and signed in
    Authenticated,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncState::Unconfigured => "not configured",
            SyncState::Initializing => "not connected",
            SyncState::Ready => "connected, signed out",
            SyncState::Authenticated => "signed in",
        };
        f.write_str(label)
    }
}

/// Sync engine events
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Full sync started
    Started,
    /// A pending day could not be pushed
    DayPushFailed { date: String, error: String },
    /// Full sync completed
    Completed {
        pushed: usize,
        pulled: usize,
        duration_ms: u64,
    },
    /// Full sync failed
    Failed { error: String },
}

/// Statistics about full sync runs
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total sync runs
    pub total_syncs: u64,
    /// Runs that completed every phase
    pub successful_syncs: u64,
    /// Runs that stopped with an error
    pub failed_syncs: u64,
    /// End of the last successful run
    pub last_sync: Option<DateTime<Utc>>,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

/// Outcome of [`SyncEngine::flush_pending`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Dates written to the remote and removed from the queue
    pub pushed: Vec<String>,
    /// Dates that stay queued, with the failure message
    pub failed: Vec<(String, String)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`SyncEngine::pull_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Whether the remote habit list replaced the local registry
    pub habits_replaced: bool,
    /// Remote days written over the local ledger
    pub days: usize,
    /// Remote days dropped for an invalid date
    pub skipped: usize,
}

/// Outcome of [`SyncEngine::sync_now`]
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Pending days phase
    pub flush: FlushReport,
    /// Pull phase
    pub pull: PullReport,
    /// Wall time of the whole run
    pub duration: Duration,
}

struct RemoteContext {
    client: Arc<dyn RemoteStore>,
    identity: watch::Receiver<Option<Identity>>,
}

pub struct SyncEngine {
    store: LocalStore,
    registry: HabitRegistry,
    ledger: Ledger,
    pending: PendingQueue,
    connector: Arc<dyn Connector>,
    context: Mutex<Option<RemoteContext>>,
    stats: RwLock<SyncStats>,
    event_callback: Option<Box<dyn Fn(SyncEvent) + Send + Sync>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: HabitRegistry::new(store.clone()),
            ledger: Ledger::new(store.clone()),
            pending: PendingQueue::new(store.clone()),
            store,
            connector,
            context: Mutex::new(None),
            stats: RwLock::new(SyncStats::default()),
            event_callback: None,
        }
    }

    /// Set event callback
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: Fn(SyncEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Box::new(callback));
    }

    fn emit_event(&self, event: SyncEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    fn settings(&self) -> Option<SyncSettings> {
        SyncSettings::load(&self.store)
    }

    pub fn is_configured(&self) -> bool {
        self.settings().is_some()
    }

    fn client(&self) -> Option<Arc<dyn RemoteStore>> {
        self.context.lock().as_ref().map(|ctx| ctx.client.clone())
    }

    pub fn state(&self) -> SyncState {
        if !self.is_configured() {
            return SyncState::Unconfigured;
        }
        match self.client() {
            None => SyncState::Initializing,
            Some(client) if client.current_identity().is_some() => SyncState::Authenticated,
            Some(_) => SyncState::Ready,
        }
    }

    /// Signed-in identity, if connected
    pub fn identity(&self) -> Option<Identity> {
        self.client().and_then(|client| client.current_identity())
    }

    /// Identity change notifications, once connected
    pub fn subscribe_identity(&self) -> Option<watch::Receiver<Option<Identity>>> {
        self.context.lock().as_ref().map(|ctx| ctx.identity.clone())
    }

    /// Drop the remote client so the next operation reconnects with the
    /// current settings
    pub fn reset(&self) {
        if self.context.lock().take().is_some() {
            log::info!("Remote client dropped");
        }
    }

    /// Create the remote client and identity subscription, once.
    fn connect(&self) -> Result<Arc<dyn RemoteStore>> {
        let settings = self.settings().ok_or(HabitError::RemoteNotConfigured)?;

        let mut context = self.context.lock();
        if let Some(ctx) = context.as_ref() {
            return Ok(ctx.client.clone());
        }

        let config = settings.remote_config()?;
        let client = self.connector.connect(&config)?;
        let identity = client.subscribe_identity();
        log::info!("Connected to remote project {}", config.project_id);

        *context = Some(RemoteContext {
            client: client.clone(),
            identity,
        });
        Ok(client)
    }

    /// Connect if needed and make sure someone is signed in.
    ///
    /// Without a current identity this signs in with the stored email and
    /// password, or anonymously when none are stored. There is no anonymous
    /// fallback: while the stored email login is rejected (wrong password,
    /// account never created) every flush and sync fails and pending days
    /// stay queued.
    pub async fn initialize(&self) -> Result<Identity> {
        let client = self.connect()?;
        if let Some(identity) = client.current_identity() {
            return Ok(identity);
        }

        let settings = self.settings().ok_or(HabitError::RemoteNotConfigured)?;
        let identity = if settings.has_email_login() {
            client
                .sign_in_with_email(settings.email.trim(), &settings.password)
                .await?
        } else {
            log::info!("No remote identity, signing in anonymously");
            client.sign_in_anonymously().await?
        };
        Ok(identity)
    }

    fn require_ready(&self) -> Result<(Arc<dyn RemoteStore>, Identity)> {
        if !self.is_configured() {
            return Err(HabitError::RemoteNotConfigured);
        }
        let client = self.client().ok_or(HabitError::RemoteNotInitialized)?;
        let identity = client
            .current_identity()
            .ok_or(HabitError::RemoteNotAuthenticated)?;
        Ok((client, identity))
    }

    fn email_login(&self) -> Result<SyncSettings> {
        let settings = self.settings().ok_or(HabitError::RemoteNotConfigured)?;
        if !settings.has_email_login() {
            return Err(HabitError::Validation(
                "Email and password must be set in the sync settings".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Sign in with the stored email and password
    pub async fn sign_in_with_email(&self) -> Result<Identity> {
        let settings = self.email_login()?;
        let client = self.connect()?;
        client
            .sign_in_with_email(settings.email.trim(), &settings.password)
            .await
    }

    /// Create an account from the stored email and password
    pub async fn create_account(&self) -> Result<Identity> {
        let settings = self.email_login()?;
        let client = self.connect()?;
        client
            .create_account(settings.email.trim(), &settings.password)
            .await
    }

    pub async fn sign_out(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(HabitError::RemoteNotConfigured);
        }
        let client = self.client().ok_or(HabitError::RemoteNotInitialized)?;
        client.sign_out().await
    }

    /// Write the whole habit registry to the remote, merge-style
    pub async fn push_habits(&self) -> Result<()> {
        let (client, identity) = self.require_ready()?;
        let habits = self.registry.get();

        let mut fields = Document::new();
        fields.insert("habits".to_string(), serde_json::to_value(&habits)?);
        fields.insert("updatedAt".to_string(), server_timestamp());

        client
            .set_document(&paths::habits(&identity.uid), fields, true)
            .await?;
        log::info!("Pushed {} habits", habits.len());
        Ok(())
    }

    /// Write one day to the remote; dequeue it only once the write is
    /// confirmed
    pub async fn push_day(&self, date: &str) -> Result<()> {
        let (client, identity) = self.require_ready()?;
        let day = self.ledger.day(date);

        let mut fields = Document::new();
        fields.insert("date".to_string(), Value::String(date.to_string()));
        fields.insert("day".to_string(), serde_json::to_value(&day)?);
        fields.insert("updatedAt".to_string(), server_timestamp());

        match client
            .set_document(&paths::day(&identity.uid, date), fields, true)
            .await
        {
            Ok(()) => {
                self.pending.remove(date);
                log::debug!("Pushed {}", date);
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to push {}, keeping it queued: {}", date, e);
                Err(e)
            }
        }
    }

    /// Push every pending day. A failed day does not stop the others.
    /// Does nothing when sync is not configured.
    pub async fn flush_pending(&self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        if !self.is_configured() {
            log::debug!("Sync not configured, leaving {} days queued", self.pending.list().len());
            return Ok(report);
        }

        self.initialize().await?;

        for date in self.pending.list() {
            match self.push_day(&date).await {
                Ok(()) => report.pushed.push(date),
                Err(e) => {
                    self.emit_event(SyncEvent::DayPushFailed {
                        date: date.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push((date, e.to_string()));
                }
            }
        }

        if !report.pushed.is_empty() || !report.failed.is_empty() {
            log::info!(
                "Flushed pending days: {} pushed, {} failed",
                report.pushed.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Replace local state with the remote copy.
    ///
    /// The remote habit list, when it holds any usable habit, replaces the
    /// local registry. Every remote day overwrites the local day with the
    /// same date; local days the remote does not have are kept.
    pub async fn pull_all(&self) -> Result<PullReport> {
        let (client, identity) = self.require_ready()?;

        let habits_doc = client.get_document(&paths::habits(&identity.uid)).await?;
        let day_docs = client.list_documents(&paths::days(&identity.uid)).await?;

        let mut report = PullReport::default();

        if let Some(raw) = habits_doc.as_ref().and_then(|doc| doc.get("habits")) {
            if !normalize(raw).is_empty() {
                self.registry.set_raw(raw);
                report.habits_replaced = true;
            }
        }

        let mut ledger = self.ledger.get();
        for (id, doc) in day_docs {
            let date = doc
                .get("date")
                .and_then(Value::as_str)
                .unwrap_or(id.as_str())
                .to_string();
            if parse_day(&date).is_err() {
                log::warn!("Skipping remote day with invalid date '{}'", date);
                report.skipped += 1;
                continue;
            }

            let day = doc.get("day").map(decode_day).unwrap_or_default();
            ledger.insert(date, day);
            report.days += 1;
        }
        self.ledger.set(&ledger);

        log::info!(
            "Pulled {} days (habits replaced: {})",
            report.days,
            report.habits_replaced
        );
        Ok(report)
    }

    /// Full sync: initialize, flush pending days, push habits, pull
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let start = Instant::now();
        self.emit_event(SyncEvent::Started);

        let result = self.run_sync().await;
        let duration = start.elapsed();

        {
            let mut stats = self.stats.write();
            stats.total_syncs += 1;
            match &result {
                Ok(_) => {
                    stats.successful_syncs += 1;
                    stats.last_sync = Some(Utc::now());
                }
                Err(e) => {
                    stats.failed_syncs += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        match result {
            Ok((flush, pull)) => {
                self.emit_event(SyncEvent::Completed {
                    pushed: flush.pushed.len(),
                    pulled: pull.days,
                    duration_ms: duration.as_millis() as u64,
                });
                Ok(SyncReport {
                    flush,
                    pull,
                    duration,
                })
            }
            Err(e) => {
                log::warn!("Sync failed: {}", e);
                self.emit_event(SyncEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_sync(&self) -> Result<(FlushReport, PullReport)> {
        self.initialize().await?;
        let flush = self.flush_pending().await?;
        self.push_habits().await?;
        let pull = self.pull_all().await?;
        Ok((flush, pull))
    }

    /// Best-effort flush after the network comes back
    pub async fn on_connectivity_restored(&self) {
        match self.flush_pending().await {
            Ok(report) if !report.is_clean() => {
                log::warn!("{} days still pending after reconnect", report.failed.len());
            }
            Ok(_) => {}
            Err(e) => log::warn!("Flush after reconnect failed: {}", e),
        }
    }

    /// Run [`Self::on_connectivity_restored`] on every offline -> online
    /// transition of `online`. Returns when the sender is dropped.
    pub async fn watch_connectivity(&self, mut online: watch::Receiver<bool>) {
        let mut was_online = *online.borrow_and_update();
        while online.changed().await.is_ok() {
            let is_online = *online.borrow_and_update();
            if is_online && !was_online {
                log::info!("Connectivity restored, flushing pending days");
                self.on_connectivity_restored().await;
            }
            was_online = is_online;
        }
    }
}
