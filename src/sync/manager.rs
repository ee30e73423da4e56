use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{BotError, Result};
use crate::storage::{CentralDb, Severity, TradeSource, TradeUpdate};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);
const STOP_GRACE: Duration = Duration::from_secs(5);
const EVENT_SOURCE: &str = "sync_manager";

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub trades_synced: BTreeMap<String, u64>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of one pass over every source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub inserted: BTreeMap<String, usize>,
    pub updated: usize,
    pub failed_rows: usize,
    pub source_errors: Vec<String>,
}

impl SyncReport {
    pub fn total_inserted(&self) -> usize {
        self.inserted.values().sum()
    }

    fn absorb(&mut self, other: SyncReport) {
        for (plugin, n) in other.inserted {
            *self.inserted.entry(plugin).or_insert(0) += n;
        }
        self.updated += other.updated;
        self.failed_rows += other.failed_rows;
        self.source_errors.extend(other.source_errors);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub plugin_id: String,
    pub last_synced_id: i64,
    pub aggregated_rows: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub stats: SyncStats,
    pub sources: Vec<SourceStatus>,
}

/// Copies per-strategy trade rows into the central database on a timer.
pub struct SyncManager {
    central: Arc<CentralDb>,
    sources: Vec<Arc<dyn TradeSource>>,
    interval: Duration,
    stats: Mutex<SyncStats>,
    pass_lock: tokio::sync::Mutex<()>,
    shutdown: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(central: Arc<CentralDb>, sources: Vec<Arc<dyn TradeSource>>, interval: Duration) -> Self {
        Self {
            central,
            sources,
            interval,
            stats: Mutex::new(SyncStats::default()),
            pass_lock: tokio::sync::Mutex::new(()),
            shutdown: Notify::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle_guard()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn handle_guard(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stats_guard(&self) -> std::sync::MutexGuard<'_, SyncStats> {
        match self.stats.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the background loop. Calling it while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle_guard();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            warn!("Sync manager already running");
            return;
        }

        let this = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { this.run_loop().await }));
        drop(handle);

        info!("Sync manager started (interval {:?})", self.interval);
        self.event(
            "SYNC_MANAGER_STARTED",
            Severity::Info,
            &format!("Sync manager started with {}s interval", self.interval.as_secs()),
        );
    }

    /// Stop the loop, cancelling any in-flight sleep.
    pub async fn stop(&self) {
        let handle = self.handle_guard().take();
        let Some(mut handle) = handle else {
            return;
        };

        self.shutdown.notify_one();
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            warn!("Sync loop did not stop within {:?}, aborting", STOP_GRACE);
            handle.abort();
        }

        info!("Sync manager stopped");
        self.event("SYNC_MANAGER_STOPPED", Severity::Info, "Sync manager stopped");
    }

    async fn run_loop(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("Sync loop received shutdown");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sync_all().await {
                        warn!("Scheduled sync failed: {}", e);
                    }
                }
            }
        }
    }

    /// One full pass. Safe to call concurrently with the scheduled loop.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let _pass = self.pass_lock.lock().await;
        let mut report = SyncReport::default();

        // rusqlite blocks, so each source pass runs on the blocking pool.
        for source in &self.sources {
            let central = Arc::clone(&self.central);
            let task_source = Arc::clone(source);
            let pass = tokio::task::spawn_blocking(move || {
                let mut part = SyncReport::default();
                let result = sync_source(&central, task_source.as_ref(), &mut part);
                (part, result)
            })
            .await;
            let (part, result) = match pass {
                Ok(done) => done,
                Err(e) => (
                    SyncReport::default(),
                    Err(BotError::Service(format!("sync task failed: {}", e))),
                ),
            };
            report.absorb(part);
            if let Err(e) = result {
                error!("Sync of {} failed: {}", source.plugin_id(), e);
                report
                    .source_errors
                    .push(format!("{}: {}", source.plugin_id(), e));
            }
        }

        let now = Utc::now();
        let mut stats = self.stats_guard();
        stats.total_syncs += 1;
        for (plugin, n) in &report.inserted {
            *stats.trades_synced.entry(plugin.clone()).or_insert(0) += *n as u64;
        }

        if report.source_errors.is_empty() {
            stats.successful_syncs += 1;
            stats.last_sync_time = Some(now);
            drop(stats);
            if let Err(e) = self.central.set_config("last_sync_time", &now.to_rfc3339()) {
                warn!("Could not store last_sync_time: {}", e);
            }
            if report.total_inserted() > 0 || report.updated > 0 {
                info!(
                    "Sync pass: {} new, {} updated, {} failed rows",
                    report.total_inserted(),
                    report.updated,
                    report.failed_rows
                );
            } else {
                debug!("Sync pass: nothing new");
            }
            Ok(report)
        } else {
            let message = report.source_errors.join("; ");
            stats.failed_syncs += 1;
            stats.last_error = Some(message.clone());
            drop(stats);
            self.event("SYNC_ERROR", Severity::Error, &message);
            Err(BotError::Service(format!("sync pass failed: {}", message)))
        }
    }

    /// Trigger a pass outside the schedule.
    pub async fn force_sync(&self) -> Result<SyncReport> {
        info!("Forced sync requested");
        self.sync_all().await
    }

    /// Push an out-of-band change into an already-synced row.
    pub fn sync_trade_update(&self, plugin_id: &str, source_trade_id: i64, update: &TradeUpdate) -> Result<bool> {
        let applied = self.central.apply_update(plugin_id, source_trade_id, update)?;
        if !applied {
            debug!("No aggregated row for {} #{}", plugin_id, source_trade_id);
        }
        Ok(applied)
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        let sources = self
            .sources
            .iter()
            .map(|s| SourceStatus {
                plugin_id: s.plugin_id().to_string(),
                last_synced_id: self.central.last_synced_id(s.plugin_id()).unwrap_or(0),
                aggregated_rows: self.central.count_aggregated(Some(s.plugin_id())).unwrap_or(0),
            })
            .collect();
        SyncStatus {
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            stats: self.stats_guard().clone(),
            sources,
        }
    }

    fn event(&self, event_type: &str, severity: Severity, message: &str) {
        if let Err(e) = self
            .central
            .log_event(event_type, severity, EVENT_SOURCE, message, None)
        {
            warn!("Could not record {} event: {}", event_type, e);
        }
    }
}

/// Copy new rows from one source and refresh the ones still open centrally.
fn sync_source(central: &CentralDb, source: &dyn TradeSource, report: &mut SyncReport) -> Result<()> {
    let plugin_id = source.plugin_id().to_string();
    let watermark = central.last_synced_id(&plugin_id)?;
    let rows = source.fetch_since(watermark)?;

    let mut inserted = 0usize;
    for row in &rows {
        match central.insert_aggregated(row) {
            Ok(true) => inserted += 1,
            Ok(false) => debug!("{} #{} already synced", plugin_id, row.source_trade_id),
            Err(e) => {
                warn!("Failed to sync {} #{}: {}", plugin_id, row.source_trade_id, e);
                report.failed_rows += 1;
            }
        }
    }
    if inserted > 0 {
        report.inserted.insert(plugin_id.clone(), inserted);
    }

    let active = central.active_source_ids(&plugin_id)?;
    if !active.is_empty() {
        for current in source.fetch_by_ids(&active)? {
            let Some(synced) = central.get_aggregated(&plugin_id, current.source_trade_id)? else {
                continue;
            };
            let update = TradeUpdate::between(&synced, &current);
            if !update.is_empty() && central.apply_update(&plugin_id, current.source_trade_id, &update)? {
                report.updated += 1;
            }
        }
    }
    Ok(())
}
