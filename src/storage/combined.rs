use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use super::{
    lock, parse_ts, parse_ts_opt, ts, AggregatedTrade, CombinedTrade, CombinedTradeRepository,
    DailyStats, LegRecord, PluginType, ProfitBooking, SignalLogEntry, SignalLogRepository,
    TradeSource,
};
use crate::core::routing::LogicTier;
use crate::core::symbols::round2;
use crate::error::Result;
use crate::models::{Direction, LegStatus, TradeStatus};
use crate::services::Ticket;

pub const COMBINED_PLUGIN_ID: &str = "combined_v3";

const SCHEMA_TRADES: &str = r#"
CREATE TABLE IF NOT EXISTS combined_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_a_ticket INTEGER,
    order_b_ticket INTEGER,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('BUY', 'SELL')),
    entry_price REAL NOT NULL,
    entry_time TEXT NOT NULL,
    exit_price REAL,
    exit_time TEXT,
    status TEXT NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'PARTIAL', 'CLOSED')),
    signal_type TEXT NOT NULL,
    signal_timeframe TEXT NOT NULL,
    consensus_score INTEGER NOT NULL DEFAULT 0 CHECK (consensus_score BETWEEN 0 AND 9),
    position_multiplier REAL NOT NULL DEFAULT 1.0,
    mtf_15m INTEGER,
    mtf_1h INTEGER,
    mtf_4h INTEGER,
    mtf_1d INTEGER,
    mtf_raw_string TEXT,
    logic_route TEXT NOT NULL,
    logic_multiplier REAL NOT NULL,
    routing_reason TEXT NOT NULL,
    order_a_lot_size REAL NOT NULL,
    order_a_sl_price REAL,
    order_a_tp_price REAL,
    order_a_status TEXT NOT NULL,
    order_a_profit_dollars REAL NOT NULL DEFAULT 0,
    order_a_error TEXT,
    order_b_lot_size REAL NOT NULL,
    order_b_sl_price REAL,
    order_b_tp_price REAL,
    order_b_status TEXT NOT NULL,
    order_b_profit_dollars REAL NOT NULL DEFAULT 0,
    order_b_error TEXT,
    total_profit_pips REAL NOT NULL DEFAULT 0,
    total_profit_dollars REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const SCHEMA_PROFIT_BOOKINGS: &str = r#"
CREATE TABLE IF NOT EXISTS combined_profit_bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id INTEGER NOT NULL REFERENCES combined_trades(id),
    ticket INTEGER NOT NULL,
    closed_lot REAL NOT NULL,
    remaining_lot REAL NOT NULL,
    profit_dollars REAL NOT NULL,
    reason TEXT NOT NULL,
    booked_at TEXT NOT NULL
);
"#;

pub(crate) const SCHEMA_SIGNALS_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plugin_id TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    symbol TEXT NOT NULL,
    direction TEXT,
    timeframe TEXT NOT NULL,
    consensus_score INTEGER,
    mtf_raw_string TEXT,
    signal_json TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    trade_placed INTEGER NOT NULL DEFAULT 0,
    trade_id INTEGER,
    skip_reason TEXT,
    received_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const SCHEMA_DAILY_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS combined_daily_stats (
    date TEXT PRIMARY KEY,
    total_dual_entries INTEGER NOT NULL DEFAULT 0,
    logic1_trades INTEGER NOT NULL DEFAULT 0,
    logic2_trades INTEGER NOT NULL DEFAULT 0,
    logic3_trades INTEGER NOT NULL DEFAULT 0,
    winning_trades INTEGER NOT NULL DEFAULT 0,
    losing_trades INTEGER NOT NULL DEFAULT 0,
    total_profit_dollars REAL NOT NULL DEFAULT 0
);
"#;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_combined_status ON combined_trades(status)",
    "CREATE INDEX IF NOT EXISTS idx_combined_symbol ON combined_trades(symbol)",
    "CREATE INDEX IF NOT EXISTS idx_combined_signal_type ON combined_trades(signal_type)",
    "CREATE INDEX IF NOT EXISTS idx_combined_logic_route ON combined_trades(logic_route)",
    "CREATE INDEX IF NOT EXISTS idx_combined_entry_time ON combined_trades(entry_time)",
    "CREATE INDEX IF NOT EXISTS idx_combined_ticket_a ON combined_trades(order_a_ticket)",
    "CREATE INDEX IF NOT EXISTS idx_combined_ticket_b ON combined_trades(order_b_ticket)",
];

const TRADE_COLUMNS: &str = "id, order_a_ticket, order_b_ticket, symbol, direction, entry_price, \
    entry_time, exit_price, exit_time, status, signal_type, signal_timeframe, consensus_score, \
    position_multiplier, mtf_15m, mtf_1h, mtf_4h, mtf_1d, mtf_raw_string, logic_route, \
    logic_multiplier, routing_reason, order_a_lot_size, order_a_sl_price, order_a_tp_price, \
    order_a_status, order_a_profit_dollars, order_a_error, order_b_lot_size, order_b_sl_price, \
    order_b_tp_price, order_b_status, order_b_profit_dollars, order_b_error, total_profit_pips, \
    total_profit_dollars";

/// SQLite store for the combined strategy.
pub struct CombinedDb {
    conn: Mutex<Connection>,
    path: String,
}

impl CombinedDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = super::open_file(&path)?;
        let db = Self {
            conn: Mutex::new(conn),
            path: path.as_ref().display().to_string(),
        };
        db.init_schema()?;
        info!("Combined database ready at {}", db.path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Mutex::new(super::open_memory()?),
            path: ":memory:".to_string(),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute_batch(SCHEMA_TRADES)?;
        conn.execute_batch(SCHEMA_PROFIT_BOOKINGS)?;
        conn.execute_batch(&SCHEMA_SIGNALS_LOG.replace("{table}", "combined_signals_log"))?;
        conn.execute_batch(SCHEMA_DAILY_STATS)?;
        for idx in INDEXES {
            conn.execute(idx, [])?;
        }
        Ok(())
    }

    fn select(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<CombinedTrade>> {
        let conn = lock(&self.conn);
        let sql = format!("SELECT {} FROM combined_trades {}", TRADE_COLUMNS, where_clause);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, row_to_trade)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Directly adjust a trade's status; used by the order monitor on broker-side closes.
    pub fn set_status(&self, id: i64, status: TradeStatus) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "UPDATE combined_trades SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<CombinedTrade> {
    let pillars: [Option<i8>; 4] = [row.get(14)?, row.get(15)?, row.get(16)?, row.get(17)?];
    let mtf_pillars = match pillars {
        [Some(a), Some(b), Some(c), Some(d)] => Some([a, b, c, d]),
        _ => None,
    };
    let direction: String = row.get(4)?;
    let route: String = row.get(19)?;
    Ok(CombinedTrade {
        id: row.get(0)?,
        symbol: row.get(3)?,
        direction: Direction::from_str_loose(&direction).unwrap_or(Direction::Buy),
        entry_price: row.get(5)?,
        entry_time: parse_ts(&row.get::<_, String>(6)?),
        exit_price: row.get(7)?,
        exit_time: parse_ts_opt(row.get(8)?),
        status: TradeStatus::parse(&row.get::<_, String>(9)?),
        signal_type: row.get(10)?,
        signal_timeframe: row.get(11)?,
        consensus_score: row.get(12)?,
        position_multiplier: row.get(13)?,
        mtf_pillars,
        mtf_raw: row.get(18)?,
        logic_route: LogicTier::from_str_loose(&route).unwrap_or(LogicTier::Logic2),
        logic_multiplier: row.get(20)?,
        routing_reason: row.get(21)?,
        order_a: LegRecord {
            ticket: row.get(1)?,
            lot_size: row.get(22)?,
            sl_price: row.get(23)?,
            tp_price: row.get(24)?,
            status: LegStatus::parse(&row.get::<_, String>(25)?),
            profit_dollars: row.get(26)?,
            error: row.get(27)?,
        },
        order_b: LegRecord {
            ticket: row.get(2)?,
            lot_size: row.get(28)?,
            sl_price: row.get(29)?,
            tp_price: row.get(30)?,
            status: LegStatus::parse(&row.get::<_, String>(31)?),
            profit_dollars: row.get(32)?,
            error: row.get(33)?,
        },
        total_profit_pips: row.get(34)?,
        total_profit_dollars: row.get(35)?,
    })
}

/// A trade is closed once no leg is still open.
fn derive_status(a: LegStatus, b: LegStatus) -> TradeStatus {
    match (a, b) {
        (LegStatus::Open, LegStatus::Open) => TradeStatus::Open,
        (LegStatus::Open, _) | (_, LegStatus::Open) => TradeStatus::Partial,
        _ => TradeStatus::Closed,
    }
}

impl CombinedTradeRepository for CombinedDb {
    fn insert_trade(&self, t: &CombinedTrade) -> Result<i64> {
        let conn = lock(&self.conn);
        let pillar = |i: usize| t.mtf_pillars.map(|p| p[i]);
        conn.execute(
            "INSERT INTO combined_trades (
                order_a_ticket, order_b_ticket, symbol, direction, entry_price, entry_time,
                status, signal_type, signal_timeframe, consensus_score, position_multiplier,
                mtf_15m, mtf_1h, mtf_4h, mtf_1d, mtf_raw_string, logic_route, logic_multiplier,
                routing_reason, order_a_lot_size, order_a_sl_price, order_a_tp_price,
                order_a_status, order_a_error, order_b_lot_size, order_b_sl_price,
                order_b_tp_price, order_b_status, order_b_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
            params![
                t.order_a.ticket,
                t.order_b.ticket,
                t.symbol,
                t.direction.as_str(),
                t.entry_price,
                ts(&t.entry_time),
                t.status.as_str(),
                t.signal_type,
                t.signal_timeframe,
                t.consensus_score.clamp(0, 9),
                t.position_multiplier,
                pillar(0),
                pillar(1),
                pillar(2),
                pillar(3),
                t.mtf_raw,
                t.logic_route.as_str(),
                t.logic_multiplier,
                t.routing_reason,
                t.order_a.lot_size,
                t.order_a.sl_price,
                t.order_a.tp_price,
                t.order_a.status.as_str(),
                t.order_a.error,
                t.order_b.lot_size,
                t.order_b.sl_price,
                t.order_b.tp_price,
                t.order_b.status.as_str(),
                t.order_b.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_trade(&self, id: i64) -> Result<Option<CombinedTrade>> {
        Ok(self.select("WHERE id = ?1", &[&id])?.into_iter().next())
    }

    fn open_trades(&self, symbol: &str) -> Result<Vec<CombinedTrade>> {
        self.select(
            "WHERE symbol = ?1 AND status != 'CLOSED' ORDER BY id ASC",
            &[&symbol],
        )
    }

    fn find_by_ticket(&self, ticket: Ticket) -> Result<Option<CombinedTrade>> {
        Ok(self
            .select(
                "WHERE order_a_ticket = ?1 OR order_b_ticket = ?1 ORDER BY id DESC LIMIT 1",
                &[&ticket],
            )?
            .into_iter()
            .next())
    }

    fn close_leg(
        &self,
        ticket: Ticket,
        exit_price: Option<f64>,
        profit_dollars: f64,
    ) -> Result<Option<CombinedTrade>> {
        let Some(mut trade) = self.find_by_ticket(ticket)? else {
            return Ok(None);
        };

        let leg = if trade.order_a.ticket == Some(ticket) {
            &mut trade.order_a
        } else {
            &mut trade.order_b
        };
        leg.status = LegStatus::Closed;
        leg.profit_dollars += profit_dollars;

        trade.total_profit_dollars = round2(trade.order_a.profit_dollars + trade.order_b.profit_dollars);
        trade.status = derive_status(trade.order_a.status, trade.order_b.status);
        if exit_price.is_some() {
            trade.exit_price = exit_price;
        }
        if trade.status == TradeStatus::Closed {
            trade.exit_time = Some(Utc::now());
        }

        {
            let conn = lock(&self.conn);
            conn.execute(
                "UPDATE combined_trades SET
                    order_a_status = ?1, order_a_profit_dollars = ?2,
                    order_b_status = ?3, order_b_profit_dollars = ?4,
                    total_profit_dollars = ?5, status = ?6, exit_price = ?7, exit_time = ?8,
                    updated_at = datetime('now')
                 WHERE id = ?9",
                params![
                    trade.order_a.status.as_str(),
                    trade.order_a.profit_dollars,
                    trade.order_b.status.as_str(),
                    trade.order_b.profit_dollars,
                    trade.total_profit_dollars,
                    trade.status.as_str(),
                    trade.exit_price,
                    trade.exit_time.as_ref().map(ts),
                    trade.id,
                ],
            )?;
        }
        Ok(Some(trade))
    }

    fn record_profit_booking(&self, b: &ProfitBooking) -> Result<i64> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO combined_profit_bookings
                (trade_id, ticket, closed_lot, remaining_lot, profit_dollars, reason, booked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                b.trade_id,
                b.ticket,
                b.closed_lot,
                b.remaining_lot,
                b.profit_dollars,
                b.reason,
                ts(&b.booked_at)
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE combined_trades SET total_profit_dollars = total_profit_dollars + ?1,
                status = CASE WHEN status = 'OPEN' THEN 'PARTIAL' ELSE status END,
                updated_at = datetime('now')
             WHERE id = ?2",
            params![b.profit_dollars, b.trade_id],
        )?;
        Ok(id)
    }

    fn record_daily_entry(&self, date: NaiveDate, tier: LogicTier) -> Result<()> {
        let column = match tier {
            LogicTier::Logic1 => "logic1_trades",
            LogicTier::Logic2 => "logic2_trades",
            LogicTier::Logic3 => "logic3_trades",
        };
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR IGNORE INTO combined_daily_stats (date) VALUES (?1)",
            params![date.to_string()],
        )?;
        conn.execute(
            &format!(
                "UPDATE combined_daily_stats SET total_dual_entries = total_dual_entries + 1,
                    {col} = {col} + 1 WHERE date = ?1",
                col = column
            ),
            params![date.to_string()],
        )?;
        Ok(())
    }

    fn record_daily_result(&self, date: NaiveDate, profit_dollars: f64) -> Result<()> {
        let (win, loss) = if profit_dollars > 0.0 { (1, 0) } else { (0, 1) };
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR IGNORE INTO combined_daily_stats (date) VALUES (?1)",
            params![date.to_string()],
        )?;
        conn.execute(
            "UPDATE combined_daily_stats SET winning_trades = winning_trades + ?1,
                losing_trades = losing_trades + ?2,
                total_profit_dollars = total_profit_dollars + ?3
             WHERE date = ?4",
            params![win, loss, profit_dollars, date.to_string()],
        )?;
        Ok(())
    }

    fn daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>> {
        let conn = lock(&self.conn);
        let stats = conn
            .query_row(
                "SELECT total_dual_entries, logic1_trades, logic2_trades, logic3_trades,
                        winning_trades, losing_trades, total_profit_dollars
                 FROM combined_daily_stats WHERE date = ?1",
                params![date.to_string()],
                |r| {
                    Ok(DailyStats {
                        date,
                        plugin_id: COMBINED_PLUGIN_ID.to_string(),
                        total_entries: r.get(0)?,
                        logic1_trades: r.get(1)?,
                        logic2_trades: r.get(2)?,
                        logic3_trades: r.get(3)?,
                        winning_trades: r.get(4)?,
                        losing_trades: r.get(5)?,
                        total_profit_dollars: r.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }
}

impl SignalLogRepository for CombinedDb {
    fn log_signal(&self, e: &SignalLogEntry) -> Result<i64> {
        let conn = lock(&self.conn);
        insert_signal_log(&conn, "combined_signals_log", e)
    }

    fn signal_count(&self, plugin_id: &str) -> Result<i64> {
        let conn = lock(&self.conn);
        let n = conn.query_row(
            "SELECT COUNT(*) FROM combined_signals_log WHERE plugin_id = ?1",
            params![plugin_id],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

pub(crate) fn insert_signal_log(conn: &Connection, table: &str, e: &SignalLogEntry) -> Result<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {} (plugin_id, signal_type, symbol, direction, timeframe, consensus_score,
                mtf_raw_string, signal_json, processed, trade_placed, trade_id, skip_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            table
        ),
        params![
            e.plugin_id,
            e.signal_type,
            e.symbol,
            e.direction.map(|d| d.as_str()),
            e.timeframe,
            e.consensus_score,
            e.mtf_raw,
            e.signal_json,
            e.processed,
            e.trade_placed,
            e.trade_id,
            e.skip_reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl TradeSource for CombinedDb {
    fn plugin_id(&self) -> &str {
        COMBINED_PLUGIN_ID
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::V3Combined
    }

    fn fetch_since(&self, after_id: i64) -> Result<Vec<AggregatedTrade>> {
        Ok(self
            .select("WHERE id > ?1 ORDER BY id ASC", &[&after_id])?
            .iter()
            .map(to_aggregated)
            .collect())
    }

    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<AggregatedTrade>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = self.get_trade(*id)? {
                out.push(to_aggregated(&t));
            }
        }
        Ok(out)
    }
}

fn to_aggregated(t: &CombinedTrade) -> AggregatedTrade {
    AggregatedTrade {
        plugin_id: COMBINED_PLUGIN_ID.to_string(),
        plugin_type: PluginType::V3Combined,
        source_trade_id: t.id,
        mt5_ticket: t.order_a.ticket.or(t.order_b.ticket),
        symbol: t.symbol.clone(),
        direction: t.direction,
        lot_size: round2(t.order_a.lot_size + t.order_b.lot_size),
        entry_price: t.entry_price,
        entry_time: t.entry_time,
        exit_price: t.exit_price,
        exit_time: t.exit_time,
        profit_pips: t.total_profit_pips,
        profit_dollars: t.total_profit_dollars,
        status: t.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(ticket: Option<Ticket>, lot: f64) -> LegRecord {
        LegRecord {
            ticket,
            lot_size: lot,
            sl_price: Some(1.0980),
            tp_price: Some(1.1040),
            status: if ticket.is_some() { LegStatus::Open } else { LegStatus::Failed },
            profit_dollars: 0.0,
            error: None,
        }
    }

    fn trade(a: Option<Ticket>, b: Option<Ticket>) -> CombinedTrade {
        CombinedTrade {
            id: 0,
            symbol: "EURUSD".into(),
            direction: Direction::Buy,
            entry_price: 1.1,
            entry_time: Utc::now(),
            exit_price: None,
            exit_time: None,
            status: TradeStatus::Open,
            signal_type: "Institutional_Launchpad".into(),
            signal_timeframe: "5".into(),
            consensus_score: 7,
            position_multiplier: 0.82,
            mtf_pillars: Some([1, 1, 1, -1]),
            mtf_raw: Some("1,1,1,1,1,-1".into()),
            logic_route: LogicTier::Logic1,
            logic_multiplier: 1.25,
            routing_reason: "timeframe:5".into(),
            order_a: leg(a, 0.05),
            order_b: leg(b, 0.05),
            total_profit_pips: 0.0,
            total_profit_dollars: 0.0,
        }
    }

    #[test]
    fn insert_and_read_back() {
        let db = CombinedDb::open_in_memory().unwrap();
        let id = db.insert_trade(&trade(Some(11), Some(12))).unwrap();
        let t = db.get_trade(id).unwrap().unwrap();
        assert_eq!(t.order_a.ticket, Some(11));
        assert_eq!(t.order_b.ticket, Some(12));
        assert_eq!(t.mtf_pillars, Some([1, 1, 1, -1]));
        assert_eq!(t.logic_route, LogicTier::Logic1);
        assert_eq!(t.status, TradeStatus::Open);
    }

    #[test]
    fn failed_leg_persists_null_ticket() {
        let db = CombinedDb::open_in_memory().unwrap();
        let mut tr = trade(None, Some(22));
        tr.order_a.error = Some("rejected".into());
        let id = db.insert_trade(&tr).unwrap();
        let t = db.get_trade(id).unwrap().unwrap();
        assert_eq!(t.order_a.ticket, None);
        assert_eq!(t.order_a.status, LegStatus::Failed);
        assert_eq!(t.order_a.error.as_deref(), Some("rejected"));
    }

    #[test]
    fn closing_legs_moves_status() {
        let db = CombinedDb::open_in_memory().unwrap();
        let id = db.insert_trade(&trade(Some(31), Some(32))).unwrap();

        let t = db.close_leg(32, Some(1.102), 10.0).unwrap().unwrap();
        assert_eq!(t.status, TradeStatus::Partial);
        let t = db.close_leg(31, Some(1.104), 20.0).unwrap().unwrap();
        assert_eq!(t.status, TradeStatus::Closed);
        assert!(t.exit_time.is_some());

        let stored = db.get_trade(id).unwrap().unwrap();
        assert!((stored.total_profit_dollars - 30.0).abs() < 1e-9);
        assert!(db.open_trades("EURUSD").unwrap().is_empty());
        assert!(db.close_leg(999, None, 0.0).unwrap().is_none());
    }

    #[test]
    fn one_failed_leg_closes_with_other() {
        let db = CombinedDb::open_in_memory().unwrap();
        db.insert_trade(&trade(None, Some(41))).unwrap();
        let t = db.close_leg(41, None, -5.0).unwrap().unwrap();
        assert_eq!(t.status, TradeStatus::Closed);
    }

    #[test]
    fn daily_stats_per_tier() {
        let db = CombinedDb::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        db.record_daily_entry(today, LogicTier::Logic1).unwrap();
        db.record_daily_entry(today, LogicTier::Logic3).unwrap();
        db.record_daily_result(today, 12.5).unwrap();
        let s = db.daily_stats(today).unwrap().unwrap();
        assert_eq!(s.total_entries, 2);
        assert_eq!(s.logic1_trades, 1);
        assert_eq!(s.logic3_trades, 1);
        assert_eq!(s.winning_trades, 1);
    }

    #[test]
    fn source_rows_after_watermark() {
        let db = CombinedDb::open_in_memory().unwrap();
        for i in 0..3 {
            db.insert_trade(&trade(Some(100 + i), Some(200 + i))).unwrap();
        }
        let rows = db.fetch_since(1).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_trade_id, 2);
        assert_eq!(rows[0].mt5_ticket, Some(101));
        assert!((rows[0].lot_size - 0.1).abs() < 1e-9);
    }

    #[test]
    fn signal_log_counts() {
        let db = CombinedDb::open_in_memory().unwrap();
        let e = SignalLogEntry {
            plugin_id: COMBINED_PLUGIN_ID.into(),
            signal_type: "Trend_Pulse".into(),
            symbol: "EURUSD".into(),
            direction: None,
            timeframe: "15".into(),
            consensus_score: None,
            mtf_raw: Some("1,1,1,1,1,1".into()),
            signal_json: "{}".into(),
            processed: true,
            trade_placed: false,
            trade_id: None,
            skip_reason: None,
        };
        db.log_signal(&e).unwrap();
        assert_eq!(db.signal_count(COMBINED_PLUGIN_ID).unwrap(), 1);
    }
}
