use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::{
    lock, parse_ts, parse_ts_opt, ts, AggregatedTrade, PluginRegistration, PluginType, Severity,
    SystemEvent, TradeUpdate,
};
use crate::error::Result;
use crate::models::{Direction, TradeStatus};

const SCHEMA_PLUGINS: &str = r#"
CREATE TABLE IF NOT EXISTS plugins_registry (
    plugin_id TEXT PRIMARY KEY,
    plugin_type TEXT NOT NULL,
    display_name TEXT NOT NULL,
    version TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    database_path TEXT NOT NULL,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const SCHEMA_AGGREGATED: &str = r#"
CREATE TABLE IF NOT EXISTS aggregated_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plugin_id TEXT NOT NULL,
    plugin_type TEXT NOT NULL,
    source_trade_id INTEGER NOT NULL,
    mt5_ticket INTEGER,
    symbol TEXT NOT NULL CHECK (length(symbol) > 0),
    direction TEXT NOT NULL,
    lot_size REAL NOT NULL,
    entry_price REAL NOT NULL,
    entry_time TEXT NOT NULL,
    exit_price REAL,
    exit_time TEXT,
    profit_pips REAL NOT NULL DEFAULT 0,
    profit_dollars REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    synced_at TEXT NOT NULL,
    UNIQUE(plugin_id, source_trade_id)
);
CREATE INDEX IF NOT EXISTS idx_aggregated_plugin ON aggregated_trades(plugin_id);
CREATE INDEX IF NOT EXISTS idx_aggregated_status ON aggregated_trades(status);
"#;

const SCHEMA_CONFIG: &str = r#"
CREATE TABLE IF NOT EXISTS system_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const SCHEMA_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS system_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    details TEXT,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
"#;

const AGG_COLUMNS: &str = "plugin_id, plugin_type, source_trade_id, mt5_ticket, symbol, \
    direction, lot_size, entry_price, entry_time, exit_price, exit_time, profit_pips, \
    profit_dollars, status";

/// Cross-strategy store: plugin registry, aggregated trades, config and events.
pub struct CentralDb {
    conn: Mutex<Connection>,
}

impl CentralDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(super::open_file(&path)?),
        };
        db.init_schema()?;
        info!("Central database ready at {}", path.as_ref().display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(super::open_memory()?),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute_batch(SCHEMA_PLUGINS)?;
        conn.execute_batch(SCHEMA_AGGREGATED)?;
        conn.execute_batch(SCHEMA_CONFIG)?;
        conn.execute_batch(SCHEMA_EVENTS)?;
        Ok(())
    }

    pub fn register_plugin(&self, p: &PluginRegistration) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO plugins_registry
                (plugin_id, plugin_type, display_name, version, enabled, database_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(plugin_id) DO UPDATE SET
                plugin_type = excluded.plugin_type, display_name = excluded.display_name,
                version = excluded.version, enabled = excluded.enabled,
                database_path = excluded.database_path",
            params![
                p.plugin_id,
                p.plugin_type.as_str(),
                p.display_name,
                p.version,
                p.enabled,
                p.database_path
            ],
        )?;
        Ok(())
    }

    pub fn plugins(&self) -> Result<Vec<PluginRegistration>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT plugin_id, plugin_type, display_name, version, enabled, database_path
             FROM plugins_registry ORDER BY plugin_id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(PluginRegistration {
                    plugin_id: r.get(0)?,
                    plugin_type: PluginType::parse(&r.get::<_, String>(1)?),
                    display_name: r.get(2)?,
                    version: r.get(3)?,
                    enabled: r.get(4)?,
                    database_path: r.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Highest source id already copied for a plugin, 0 when none.
    pub fn last_synced_id(&self, plugin_id: &str) -> Result<i64> {
        let conn = lock(&self.conn);
        let id = conn.query_row(
            "SELECT COALESCE(MAX(source_trade_id), 0) FROM aggregated_trades WHERE plugin_id = ?1",
            params![plugin_id],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    /// Returns false when the row was already present.
    pub fn insert_aggregated(&self, t: &AggregatedTrade) -> Result<bool> {
        let conn = lock(&self.conn);
        let n = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO aggregated_trades ({}, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                AGG_COLUMNS
            ),
            params![
                t.plugin_id,
                t.plugin_type.as_str(),
                t.source_trade_id,
                t.mt5_ticket,
                t.symbol,
                t.direction.as_str(),
                t.lot_size,
                t.entry_price,
                ts(&t.entry_time),
                t.exit_price,
                t.exit_time.as_ref().map(ts),
                t.profit_pips,
                t.profit_dollars,
                t.status.as_str(),
                ts(&Utc::now()),
            ],
        )?;
        Ok(n > 0)
    }

    /// Source ids of rows still OPEN or PARTIAL for a plugin.
    pub fn active_source_ids(&self, plugin_id: &str) -> Result<Vec<i64>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT source_trade_id FROM aggregated_trades
             WHERE plugin_id = ?1 AND status IN ('OPEN', 'PARTIAL') ORDER BY source_trade_id",
        )?;
        let ids = stmt
            .query_map(params![plugin_id], |r| r.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn get_aggregated(&self, plugin_id: &str, source_trade_id: i64) -> Result<Option<AggregatedTrade>> {
        let conn = lock(&self.conn);
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM aggregated_trades WHERE plugin_id = ?1 AND source_trade_id = ?2",
                    AGG_COLUMNS
                ),
                params![plugin_id, source_trade_id],
                row_to_aggregated,
            )
            .optional()?;
        Ok(row)
    }

    /// Applies only the fields present in `update`; returns whether a row matched.
    pub fn apply_update(&self, plugin_id: &str, source_trade_id: i64, update: &TradeUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let conn = lock(&self.conn);
        let n = conn.execute(
            "UPDATE aggregated_trades SET
                exit_price = COALESCE(?1, exit_price),
                exit_time = COALESCE(?2, exit_time),
                profit_pips = COALESCE(?3, profit_pips),
                profit_dollars = COALESCE(?4, profit_dollars),
                status = COALESCE(?5, status),
                synced_at = ?6
             WHERE plugin_id = ?7 AND source_trade_id = ?8",
            params![
                update.exit_price,
                update.exit_time.as_ref().map(ts),
                update.profit_pips,
                update.profit_dollars,
                update.status.map(|s| s.as_str()),
                ts(&Utc::now()),
                plugin_id,
                source_trade_id,
            ],
        )?;
        Ok(n > 0)
    }

    pub fn count_aggregated(&self, plugin_id: Option<&str>) -> Result<i64> {
        let conn = lock(&self.conn);
        let n = match plugin_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM aggregated_trades WHERE plugin_id = ?1",
                params![id],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM aggregated_trades", [], |r| r.get(0))?,
        };
        Ok(n)
    }

    pub fn aggregated_trades(&self, plugin_id: &str) -> Result<Vec<AggregatedTrade>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM aggregated_trades WHERE plugin_id = ?1 ORDER BY source_trade_id",
            AGG_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![plugin_id], row_to_aggregated)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO system_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = lock(&self.conn);
        let v = conn
            .query_row(
                "SELECT value FROM system_config WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v)
    }

    pub fn log_event(
        &self,
        event_type: &str,
        severity: Severity,
        source: &str,
        message: &str,
        details: Option<&str>,
    ) -> Result<i64> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO system_events (event_type, severity, source, message, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![event_type, severity.as_str(), source, message, details, ts(&Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<SystemEvent>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, event_type, severity, source, message, details, acknowledged, created_at
             FROM system_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                Ok(SystemEvent {
                    id: r.get(0)?,
                    event_type: r.get(1)?,
                    severity: Severity::parse(&r.get::<_, String>(2)?),
                    source: r.get(3)?,
                    message: r.get(4)?,
                    details: r.get(5)?,
                    acknowledged: r.get(6)?,
                    created_at: parse_ts(&r.get::<_, String>(7)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_aggregated(r: &rusqlite::Row<'_>) -> rusqlite::Result<AggregatedTrade> {
    let direction: String = r.get(5)?;
    Ok(AggregatedTrade {
        plugin_id: r.get(0)?,
        plugin_type: PluginType::parse(&r.get::<_, String>(1)?),
        source_trade_id: r.get(2)?,
        mt5_ticket: r.get(3)?,
        symbol: r.get(4)?,
        direction: Direction::from_str_loose(&direction).unwrap_or(Direction::Buy),
        lot_size: r.get(6)?,
        entry_price: r.get(7)?,
        entry_time: parse_ts(&r.get::<_, String>(8)?),
        exit_price: r.get(9)?,
        exit_time: parse_ts_opt(r.get(10)?),
        profit_pips: r.get(11)?,
        profit_dollars: r.get(12)?,
        status: TradeStatus::parse(&r.get::<_, String>(13)?),
    })
}
