use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::combined::{insert_signal_log, SCHEMA_SIGNALS_LOG};
use super::{
    lock, parse_ts, parse_ts_opt, ts, AggregatedTrade, DailyStats, LegRecord, PluginType,
    PriceActionTrade, PriceActionTradeRepository, SignalLogEntry, SignalLogRepository,
    TradeSource,
};
use crate::core::symbols::round2;
use crate::error::Result;
use crate::models::{Direction, LegStatus, MarketState, PriceActionVariant, TradeStatus};
use crate::services::Ticket;

/// Shared column layout of the four variant tables.
const SCHEMA_VARIANT_TRADES: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('BUY', 'SELL')),
    entry_price REAL NOT NULL,
    entry_time TEXT NOT NULL,
    exit_price REAL,
    exit_time TEXT,
    status TEXT NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'PARTIAL', 'CLOSED')),
    signal_type TEXT NOT NULL,
    order_a_ticket INTEGER,
    order_a_lot_size REAL,
    order_a_sl_price REAL,
    order_a_tp_price REAL,
    order_a_status TEXT,
    order_a_error TEXT,
    order_b_ticket INTEGER,
    order_b_lot_size REAL,
    order_b_sl_price REAL,
    order_b_tp_price REAL,
    order_b_status TEXT,
    order_b_error TEXT,
    adx REAL,
    confidence INTEGER,
    market_state TEXT,
    htf_aligned INTEGER,
    sl_multiplier REAL NOT NULL,
    max_hold_minutes INTEGER NOT NULL,
    breakeven_after_tp1 INTEGER NOT NULL DEFAULT 0,
    profit_pips REAL NOT NULL DEFAULT 0,
    profit_dollars REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status);
CREATE INDEX IF NOT EXISTS idx_{table}_symbol ON {table}(symbol);
"#;

const SCHEMA_DAILY_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS price_action_daily_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    plugin_id TEXT NOT NULL,
    total_entries INTEGER NOT NULL DEFAULT 0,
    winning_trades INTEGER NOT NULL DEFAULT 0,
    losing_trades INTEGER NOT NULL DEFAULT 0,
    total_profit_dollars REAL NOT NULL DEFAULT 0,
    UNIQUE(date, plugin_id)
);
"#;

const TRADE_COLUMNS: &str = "id, symbol, direction, entry_price, entry_time, exit_price, \
    exit_time, status, signal_type, order_a_ticket, order_a_lot_size, order_a_sl_price, \
    order_a_tp_price, order_a_status, order_a_error, order_b_ticket, order_b_lot_size, \
    order_b_sl_price, order_b_tp_price, order_b_status, order_b_error, adx, confidence, \
    market_state, htf_aligned, sl_multiplier, max_hold_minutes, breakeven_after_tp1, \
    profit_pips, profit_dollars";

/// SQLite store shared by the four price-action variants.
pub struct PriceActionDb {
    conn: Mutex<Connection>,
}

impl PriceActionDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(super::open_file(&path)?),
        };
        db.init_schema()?;
        info!("Price action database ready at {}", path.as_ref().display());
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
        for variant in PriceActionVariant::ALL {
            conn.execute_batch(&SCHEMA_VARIANT_TRADES.replace("{table}", variant.table()))?;
        }
        conn.execute_batch(&SCHEMA_SIGNALS_LOG.replace("{table}", "price_action_signals_log"))?;
        conn.execute_batch(SCHEMA_DAILY_STATS)?;
        Ok(())
    }

    fn select(
        &self,
        variant: PriceActionVariant,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PriceActionTrade>> {
        select_trades(&lock(&self.conn), variant, where_clause, args)
    }
}

fn select_trades(
    conn: &Connection,
    variant: PriceActionVariant,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<PriceActionTrade>> {
    let sql = format!("SELECT {} FROM {} {}", TRADE_COLUMNS, variant.table(), where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, |r| row_to_trade(variant, r))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark the legs holding `tickets` closed; the trade stays PARTIAL while any leg is open.
fn settle_legs(trade: &mut PriceActionTrade, tickets: &[Ticket]) -> bool {
    let mut touched = false;
    for leg in [trade.order_a.as_mut(), trade.order_b.as_mut()].into_iter().flatten() {
        if leg.status == LegStatus::Open && leg.ticket.is_some_and(|t| tickets.contains(&t)) {
            leg.status = LegStatus::Closed;
            touched = true;
        }
    }
    if !touched {
        return false;
    }
    let still_open = [trade.order_a.as_ref(), trade.order_b.as_ref()]
        .into_iter()
        .flatten()
        .any(|leg| leg.status == LegStatus::Open);
    trade.status = if still_open { TradeStatus::Partial } else { TradeStatus::Closed };
    true
}

fn leg_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Option<LegRecord>> {
    let lot: Option<f64> = row.get(base + 1)?;
    let Some(lot_size) = lot else {
        return Ok(None);
    };
    let status: Option<String> = row.get(base + 4)?;
    Ok(Some(LegRecord {
        ticket: row.get(base)?,
        lot_size,
        sl_price: row.get(base + 2)?,
        tp_price: row.get(base + 3)?,
        status: status.as_deref().map(LegStatus::parse).unwrap_or(LegStatus::Open),
        profit_dollars: 0.0,
        error: row.get(base + 5)?,
    }))
}

fn row_to_trade(variant: PriceActionVariant, row: &Row<'_>) -> rusqlite::Result<PriceActionTrade> {
    let direction: String = row.get(2)?;
    let market_state: Option<String> = row.get(23)?;
    Ok(PriceActionTrade {
        id: row.get(0)?,
        variant,
        symbol: row.get(1)?,
        direction: Direction::from_str_loose(&direction).unwrap_or(Direction::Buy),
        entry_price: row.get(3)?,
        entry_time: parse_ts(&row.get::<_, String>(4)?),
        exit_price: row.get(5)?,
        exit_time: parse_ts_opt(row.get(6)?),
        status: TradeStatus::parse(&row.get::<_, String>(7)?),
        signal_type: row.get(8)?,
        order_a: leg_from_row(row, 9)?,
        order_b: leg_from_row(row, 15)?,
        adx: row.get(21)?,
        confidence: row.get(22)?,
        market_state: market_state.as_deref().map(MarketState::parse),
        htf_aligned: row.get(24)?,
        sl_multiplier: row.get(25)?,
        max_hold_minutes: row.get(26)?,
        breakeven_after_tp1: row.get(27)?,
        profit_pips: row.get(28)?,
        profit_dollars: row.get(29)?,
    })
}

impl PriceActionTradeRepository for PriceActionDb {
    fn insert_trade(&self, t: &PriceActionTrade) -> Result<i64> {
        let conn = lock(&self.conn);
        let a = t.order_a.as_ref();
        let b = t.order_b.as_ref();
        conn.execute(
            &format!(
                "INSERT INTO {} (
                    symbol, direction, entry_price, entry_time, status, signal_type,
                    order_a_ticket, order_a_lot_size, order_a_sl_price, order_a_tp_price,
                    order_a_status, order_a_error,
                    order_b_ticket, order_b_lot_size, order_b_sl_price, order_b_tp_price,
                    order_b_status, order_b_error,
                    adx, confidence, market_state, htf_aligned, sl_multiplier,
                    max_hold_minutes, breakeven_after_tp1
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
                t.variant.table()
            ),
            params![
                t.symbol,
                t.direction.as_str(),
                t.entry_price,
                ts(&t.entry_time),
                t.status.as_str(),
                t.signal_type,
                a.and_then(|l| l.ticket),
                a.map(|l| l.lot_size),
                a.and_then(|l| l.sl_price),
                a.and_then(|l| l.tp_price),
                a.map(|l| l.status.as_str()),
                a.and_then(|l| l.error.clone()),
                b.and_then(|l| l.ticket),
                b.map(|l| l.lot_size),
                b.and_then(|l| l.sl_price),
                b.and_then(|l| l.tp_price),
                b.map(|l| l.status.as_str()),
                b.and_then(|l| l.error.clone()),
                t.adx,
                t.confidence,
                t.market_state.map(|m| m.to_string()),
                t.htf_aligned,
                t.sl_multiplier,
                t.max_hold_minutes,
                t.breakeven_after_tp1,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_trade(&self, variant: PriceActionVariant, id: i64) -> Result<Option<PriceActionTrade>> {
        Ok(self.select(variant, "WHERE id = ?1", &[&id])?.into_iter().next())
    }

    fn open_trades(&self, variant: PriceActionVariant, symbol: &str) -> Result<Vec<PriceActionTrade>> {
        self.select(
            variant,
            "WHERE symbol = ?1 AND status != 'CLOSED' ORDER BY id ASC",
            &[&symbol],
        )
    }

    fn close_legs(
        &self,
        variant: PriceActionVariant,
        id: i64,
        tickets: &[Ticket],
        exit_price: f64,
        profit_pips: f64,
        profit_dollars: f64,
    ) -> Result<Option<PriceActionTrade>> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        let Some(mut trade) = select_trades(&tx, variant, "WHERE id = ?1", &[&id])?.into_iter().next() else {
            return Ok(None);
        };
        if trade.status == TradeStatus::Closed || !settle_legs(&mut trade, tickets) {
            return Ok(Some(trade));
        }

        trade.exit_price = Some(exit_price);
        trade.profit_pips = profit_pips;
        trade.profit_dollars = round2(trade.profit_dollars + profit_dollars);
        if trade.status == TradeStatus::Closed {
            trade.exit_time = Some(Utc::now());
        }
        tx.execute(
            &format!(
                "UPDATE {} SET status = ?1, exit_price = ?2, exit_time = ?3,
                    profit_pips = ?4, profit_dollars = ?5, order_a_status = ?6, order_b_status = ?7
                 WHERE id = ?8",
                variant.table()
            ),
            params![
                trade.status.as_str(),
                trade.exit_price,
                trade.exit_time.as_ref().map(ts),
                trade.profit_pips,
                trade.profit_dollars,
                trade.order_a.as_ref().map(|l| l.status.as_str()),
                trade.order_b.as_ref().map(|l| l.status.as_str()),
                trade.id,
            ],
        )?;

        // A trade counts toward the day once its last leg is out.
        if trade.status == TradeStatus::Closed {
            let date = Utc::now().date_naive().to_string();
            let (win, loss) = if trade.profit_dollars > 0.0 { (1, 0) } else { (0, 1) };
            tx.execute(
                "INSERT OR IGNORE INTO price_action_daily_stats (date, plugin_id) VALUES (?1, ?2)",
                params![date, variant.plugin_id()],
            )?;
            tx.execute(
                "UPDATE price_action_daily_stats SET winning_trades = winning_trades + ?1,
                    losing_trades = losing_trades + ?2,
                    total_profit_dollars = total_profit_dollars + ?3
                 WHERE date = ?4 AND plugin_id = ?5",
                params![win, loss, trade.profit_dollars, date, variant.plugin_id()],
            )?;
        }
        tx.commit()?;
        Ok(Some(trade))
    }

    fn record_daily_entry(&self, date: NaiveDate, variant: PriceActionVariant) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO price_action_daily_stats (date, plugin_id, total_entries) VALUES (?1, ?2, 1)
             ON CONFLICT(date, plugin_id) DO UPDATE SET total_entries = total_entries + 1",
            params![date.to_string(), variant.plugin_id()],
        )?;
        Ok(())
    }

    fn daily_stats(&self, date: NaiveDate, variant: PriceActionVariant) -> Result<Option<DailyStats>> {
        let conn = lock(&self.conn);
        let stats = conn
            .query_row(
                "SELECT total_entries, winning_trades, losing_trades, total_profit_dollars
                 FROM price_action_daily_stats WHERE date = ?1 AND plugin_id = ?2",
                params![date.to_string(), variant.plugin_id()],
                |r| {
                    Ok(DailyStats {
                        date,
                        plugin_id: variant.plugin_id().to_string(),
                        total_entries: r.get(0)?,
                        winning_trades: r.get(1)?,
                        losing_trades: r.get(2)?,
                        total_profit_dollars: r.get(3)?,
                        ..Default::default()
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }
}

impl SignalLogRepository for PriceActionDb {
    fn log_signal(&self, e: &SignalLogEntry) -> Result<i64> {
        let conn = lock(&self.conn);
        insert_signal_log(&conn, "price_action_signals_log", e)
    }

    fn signal_count(&self, plugin_id: &str) -> Result<i64> {
        let conn = lock(&self.conn);
        let n = conn.query_row(
            "SELECT COUNT(*) FROM price_action_signals_log WHERE plugin_id = ?1",
            params![plugin_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

/// One variant table exposed to the sync manager.
pub struct PriceActionSource {
    db: Arc<PriceActionDb>,
    variant: PriceActionVariant,
}

impl PriceActionSource {
    pub fn new(db: Arc<PriceActionDb>, variant: PriceActionVariant) -> Self {
        Self { db, variant }
    }

    /// One source per variant over the same database.
    pub fn all(db: &Arc<PriceActionDb>) -> Vec<PriceActionSource> {
        PriceActionVariant::ALL
            .iter()
            .map(|v| PriceActionSource::new(Arc::clone(db), *v))
            .collect()
    }
}

impl TradeSource for PriceActionSource {
    fn plugin_id(&self) -> &str {
        self.variant.plugin_id()
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::V6PriceAction
    }

    fn fetch_since(&self, after_id: i64) -> Result<Vec<AggregatedTrade>> {
        Ok(self
            .db
            .select(self.variant, "WHERE id > ?1 ORDER BY id ASC", &[&after_id])?
            .iter()
            .map(to_aggregated)
            .collect())
    }

    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<AggregatedTrade>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = self.db.get_trade(self.variant, *id)? {
                out.push(to_aggregated(&t));
            }
        }
        Ok(out)
    }
}

fn to_aggregated(t: &PriceActionTrade) -> AggregatedTrade {
    AggregatedTrade {
        plugin_id: t.variant.plugin_id().to_string(),
        plugin_type: PluginType::V6PriceAction,
        source_trade_id: t.id,
        mt5_ticket: t.primary_ticket(),
        symbol: t.symbol.clone(),
        direction: t.direction,
        lot_size: (t.total_lot() * 100.0).round() / 100.0,
        entry_price: t.entry_price,
        entry_time: t.entry_time,
        exit_price: t.exit_price,
        exit_time: t.exit_time,
        profit_pips: t.profit_pips,
        profit_dollars: t.profit_dollars,
        status: t.status,
    }
}
