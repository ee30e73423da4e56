pub mod central;
pub mod combined;
pub mod price_action;
pub mod records;

pub use central::CentralDb;
pub use combined::CombinedDb;
pub use price_action::{PriceActionDb, PriceActionSource};
pub use records::*;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::core::routing::LogicTier;
use crate::error::Result;
use crate::models::PriceActionVariant;
use crate::services::Ticket;

const BUSY_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Open a file database in WAL mode so the sync reader never blocks the writer.
pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Connection> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::BotError::Config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
    }
    let conn = Connection::open(path.as_ref())?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    debug!("Opened database {}", path.as_ref().display());
    Ok(conn)
}

pub fn open_memory() -> Result<Connection> {
    Ok(Connection::open_in_memory()?)
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_ts)
}

/// Persistence of combined-strategy entries.
pub trait CombinedTradeRepository: Send + Sync {
    fn insert_trade(&self, trade: &CombinedTrade) -> Result<i64>;
    fn get_trade(&self, id: i64) -> Result<Option<CombinedTrade>>;
    fn open_trades(&self, symbol: &str) -> Result<Vec<CombinedTrade>>;
    fn find_by_ticket(&self, ticket: Ticket) -> Result<Option<CombinedTrade>>;
    /// Mark the leg holding `ticket` closed; the trade becomes PARTIAL or CLOSED.
    fn close_leg(&self, ticket: Ticket, exit_price: Option<f64>, profit_dollars: f64)
        -> Result<Option<CombinedTrade>>;
    fn record_profit_booking(&self, booking: &ProfitBooking) -> Result<i64>;
    fn record_daily_entry(&self, date: NaiveDate, tier: LogicTier) -> Result<()>;
    fn record_daily_result(&self, date: NaiveDate, profit_dollars: f64) -> Result<()>;
    fn daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>>;
}

/// Persistence of price-action entries, one table per variant.
pub trait PriceActionTradeRepository: Send + Sync {
    fn insert_trade(&self, trade: &PriceActionTrade) -> Result<i64>;
    fn get_trade(&self, variant: PriceActionVariant, id: i64) -> Result<Option<PriceActionTrade>>;
    fn open_trades(&self, variant: PriceActionVariant, symbol: &str) -> Result<Vec<PriceActionTrade>>;
    /// Close the legs holding `tickets` and book their profit. The trade stays
    /// PARTIAL while another leg is open; daily stats move only on the final close.
    fn close_legs(
        &self,
        variant: PriceActionVariant,
        id: i64,
        tickets: &[Ticket],
        exit_price: f64,
        profit_pips: f64,
        profit_dollars: f64,
    ) -> Result<Option<PriceActionTrade>>;
    fn record_daily_entry(&self, date: NaiveDate, variant: PriceActionVariant) -> Result<()>;
    fn daily_stats(&self, date: NaiveDate, variant: PriceActionVariant) -> Result<Option<DailyStats>>;
}

pub trait SignalLogRepository: Send + Sync {
    fn log_signal(&self, entry: &SignalLogEntry) -> Result<i64>;
    fn signal_count(&self, plugin_id: &str) -> Result<i64>;
}

/// A per-strategy table the sync manager copies from.
pub trait TradeSource: Send + Sync {
    fn plugin_id(&self) -> &str;
    fn plugin_type(&self) -> PluginType;
    /// Rows with `id > after_id`, ascending.
    fn fetch_since(&self, after_id: i64) -> Result<Vec<AggregatedTrade>>;
    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<AggregatedTrade>>;
}
