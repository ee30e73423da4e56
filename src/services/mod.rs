pub mod bounded;
pub mod paper;
pub mod symbol_lock;
pub mod trend;

pub use bounded::{bounded, BoundedExecution};
pub use paper::PaperBroker;
pub use symbol_lock::SymbolLocks;
pub use trend::CachedTrendService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Direction, MarketState, Timeframe};

pub type Ticket = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub lot: f64,
    /// Reference entry price from the signal.
    pub price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub comment: String,
    pub strategy_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub open_price: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    /// Floating profit in account currency.
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MtfAlignment {
    pub aligned: bool,
    pub direction: Option<Direction>,
}

/// Brokerage order placement.
#[async_trait]
pub trait OrderExecution: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<Ticket>;
    async fn close_order(&self, ticket: Ticket, strategy_id: &str) -> Result<bool>;
    /// Close `lot` of an open position, leaving the rest running.
    async fn close_partial(&self, ticket: Ticket, lot: f64, strategy_id: &str) -> Result<bool>;
    async fn get_open_orders(&self, symbol: &str, strategy_id: &str) -> Result<Vec<OpenOrder>>;
}

/// Balance and broker-side risk maths.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn get_balance(&self) -> Result<f64>;
    async fn compute_base_lot(&self, balance: f64, stop_distance_pips: f64, symbol: &str) -> Result<f64>;
    async fn get_spread_pips(&self, symbol: &str) -> Result<f64>;
}

/// Live trend/alignment lookups backed by the trend store.
#[async_trait]
pub trait TrendService: Send + Sync {
    async fn get_mtf_alignment(&self, symbol: &str) -> Result<MtfAlignment>;
    async fn check_pulse_alignment(&self, symbol: &str, direction: Direction) -> Result<bool>;
    /// True when every listed timeframe trends with `direction`.
    async fn check_timeframe_alignment(
        &self,
        symbol: &str,
        direction: Direction,
        timeframes: &[Timeframe],
    ) -> Result<bool>;
    async fn get_market_state(&self, symbol: &str) -> Result<MarketState>;
}
