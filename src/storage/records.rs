use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::routing::LogicTier;
use crate::models::{Direction, LegStatus, MarketState, PriceActionVariant, TradeStatus};
use crate::services::Ticket;

/// One leg of a persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegRecord {
    pub ticket: Option<Ticket>,
    pub lot_size: f64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub status: LegStatus,
    #[serde(default)]
    pub profit_dollars: f64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Dual-order entry of the combined strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedTrade {
    #[serde(default)]
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub signal_type: String,
    pub signal_timeframe: String,
    pub consensus_score: i32,
    pub position_multiplier: f64,
    #[serde(default)]
    pub mtf_pillars: Option<[i8; 4]>,
    #[serde(default)]
    pub mtf_raw: Option<String>,
    pub logic_route: LogicTier,
    pub logic_multiplier: f64,
    pub routing_reason: String,
    pub order_a: LegRecord,
    pub order_b: LegRecord,
    #[serde(default)]
    pub total_profit_pips: f64,
    #[serde(default)]
    pub total_profit_dollars: f64,
}

/// Single- or dual-leg entry of a price-action variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceActionTrade {
    #[serde(default)]
    pub id: i64,
    pub variant: PriceActionVariant,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub signal_type: String,
    pub order_a: Option<LegRecord>,
    pub order_b: Option<LegRecord>,
    #[serde(default)]
    pub adx: Option<f64>,
    #[serde(default)]
    pub confidence: Option<u32>,
    #[serde(default)]
    pub market_state: Option<MarketState>,
    #[serde(default)]
    pub htf_aligned: Option<bool>,
    pub sl_multiplier: f64,
    pub max_hold_minutes: u32,
    #[serde(default)]
    pub breakeven_after_tp1: bool,
    #[serde(default)]
    pub profit_pips: f64,
    #[serde(default)]
    pub profit_dollars: f64,
}

impl PriceActionTrade {
    /// Broker ticket the central store keys this row by.
    pub fn primary_ticket(&self) -> Option<Ticket> {
        self.order_a
            .as_ref()
            .and_then(|l| l.ticket)
            .or_else(|| self.order_b.as_ref().and_then(|l| l.ticket))
    }

    pub fn total_lot(&self) -> f64 {
        self.order_a.as_ref().map_or(0.0, |l| l.lot_size)
            + self.order_b.as_ref().map_or(0.0, |l| l.lot_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitBooking {
    pub trade_id: i64,
    pub ticket: Ticket,
    pub closed_lot: f64,
    pub remaining_lot: f64,
    pub profit_dollars: f64,
    pub reason: String,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLogEntry {
    pub plugin_id: String,
    pub signal_type: String,
    pub symbol: String,
    pub direction: Option<Direction>,
    pub timeframe: String,
    pub consensus_score: Option<i32>,
    pub mtf_raw: Option<String>,
    pub signal_json: String,
    pub processed: bool,
    pub trade_placed: bool,
    pub trade_id: Option<i64>,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub plugin_id: String,
    pub total_entries: i64,
    pub logic1_trades: i64,
    pub logic2_trades: i64,
    pub logic3_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub total_profit_dollars: f64,
}

impl DailyStats {
    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_trades + self.losing_trades;
        if closed == 0 {
            0.0
        } else {
            self.winning_trades as f64 / closed as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginType {
    V3Combined,
    V6PriceAction,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::V3Combined => "V3_COMBINED",
            PluginType::V6PriceAction => "V6_PRICE_ACTION",
        }
    }

    pub fn parse(s: &str) -> PluginType {
        match s {
            "V6_PRICE_ACTION" => PluginType::V6PriceAction,
            _ => PluginType::V3Combined,
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRegistration {
    pub plugin_id: String,
    pub plugin_type: PluginType,
    pub display_name: String,
    pub version: String,
    pub enabled: bool,
    pub database_path: String,
}

/// Row of the central aggregated table, keyed by (plugin_id, source_trade_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTrade {
    pub plugin_id: String,
    pub plugin_type: PluginType,
    pub source_trade_id: i64,
    pub mt5_ticket: Option<Ticket>,
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profit_pips: f64,
    #[serde(default)]
    pub profit_dollars: f64,
    pub status: TradeStatus,
}

/// Changes pushed into an already-synced aggregated row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub profit_pips: Option<f64>,
    pub profit_dollars: Option<f64>,
    pub status: Option<TradeStatus>,
}

impl TradeUpdate {
    pub fn is_empty(&self) -> bool {
        self.exit_price.is_none()
            && self.exit_time.is_none()
            && self.profit_pips.is_none()
            && self.profit_dollars.is_none()
            && self.status.is_none()
    }

    /// Everything that changed between a synced row and its current source row.
    pub fn between(synced: &AggregatedTrade, current: &AggregatedTrade) -> TradeUpdate {
        TradeUpdate {
            exit_price: (current.exit_price != synced.exit_price).then_some(current.exit_price).flatten(),
            exit_time: (current.exit_time != synced.exit_time).then_some(current.exit_time).flatten(),
            profit_pips: (current.profit_pips != synced.profit_pips).then_some(current.profit_pips),
            profit_dollars: (current.profit_dollars != synced.profit_dollars)
                .then_some(current.profit_dollars),
            status: (current.status != synced.status).then_some(current.status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Severity {
        match s {
            "DEBUG" => Severity::Debug,
            "WARNING" => Severity::Warning,
            "ERROR" => Severity::Error,
            "CRITICAL" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: i64,
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub details: Option<String>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}
