//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{BotError, Result};
use crate::models::{
    Direction, EntryKind, MarketState, Signal, SignalKind, StrategyFamily, Timeframe,
};
use crate::services::{
    AccountService, MtfAlignment, OpenOrder, OrderExecution, OrderRequest, Ticket, TrendService,
};

pub fn entry_signal(kind: EntryKind, direction: Direction, timeframe: &str) -> Signal {
    Signal {
        kind: SignalKind::Entry(kind, direction),
        wire_type: kind.name().to_string(),
        symbol: "EURUSD".to_string(),
        timeframe: timeframe.to_string(),
        price: 1.1000,
        sl: Some(1.0980),
        tp1: Some(1.1020),
        tp2: Some(1.1040),
        tp3: Some(1.1080),
        adx: Some(30.0),
        adx_strength: None,
        confidence: Some(85),
        consensus_score: Some(7),
        mtf: None,
        family: StrategyFamily::Combined,
        fresh_entry: false,
        received_at: Utc::now(),
    }
}

#[derive(Default)]
struct MockState {
    next_ticket: Ticket,
    placed: Vec<OrderRequest>,
    open: Vec<(String, OpenOrder)>,
    closed: Vec<Ticket>,
    fail_comments: Vec<String>,
    refused_closes: Vec<Ticket>,
    balance: f64,
    base_lot: f64,
    spread: f64,
    market: HashMap<String, MarketState>,
    pulse: bool,
    htf_aligned: bool,
    htf_calls: Vec<Vec<Timeframe>>,
}

/// Scriptable broker/account/trend double.
pub struct MockBroker {
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_ticket: 1,
                balance: 15_000.0,
                base_lot: 0.40,
                spread: 1.0,
                pulse: true,
                htf_aligned: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn fail_comments_containing(&self, needle: &str) {
        self.lock().fail_comments.push(needle.to_string());
    }

    /// The broker answers "not closed" for `ticket` until `allow_close`.
    pub fn refuse_close(&self, ticket: Ticket) {
        self.lock().refused_closes.push(ticket);
    }

    pub fn allow_close(&self, ticket: Ticket) {
        self.lock().refused_closes.retain(|t| *t != ticket);
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.lock().placed.clone()
    }

    pub fn closed(&self) -> Vec<Ticket> {
        self.lock().closed.clone()
    }

    pub fn add_open(&self, strategy_id: &str, order: OpenOrder) {
        self.lock().open.push((strategy_id.to_string(), order));
    }

    pub fn set_balance(&self, balance: f64) {
        self.lock().balance = balance;
    }

    pub fn set_base_lot(&self, lot: f64) {
        self.lock().base_lot = lot;
    }

    pub fn set_spread(&self, spread: f64) {
        self.lock().spread = spread;
    }

    pub fn set_market(&self, symbol: &str, state: MarketState) {
        self.lock().market.insert(symbol.to_string(), state);
    }

    pub fn set_pulse(&self, aligned: bool) {
        self.lock().pulse = aligned;
    }

    pub fn set_htf_aligned(&self, aligned: bool) {
        self.lock().htf_aligned = aligned;
    }

    pub fn htf_calls(&self) -> Vec<Vec<Timeframe>> {
        self.lock().htf_calls.clone()
    }
}

#[async_trait]
impl OrderExecution for MockBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<Ticket> {
        let mut s = self.lock();
        if s.fail_comments.iter().any(|c| request.comment.contains(c.as_str())) {
            return Err(BotError::OrderRejected(format!("scripted failure: {}", request.comment)));
        }
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        s.placed.push(request.clone());
        let order = OpenOrder {
            ticket,
            symbol: request.symbol.clone(),
            direction: request.direction,
            lot_size: request.lot,
            open_price: request.price,
            current_price: None,
            profit: 0.0,
            comment: request.comment.clone(),
        };
        s.open.push((request.strategy_id.clone(), order));
        Ok(ticket)
    }

    async fn close_order(&self, ticket: Ticket, strategy_id: &str) -> Result<bool> {
        let mut s = self.lock();
        if s.refused_closes.contains(&ticket) {
            return Ok(false);
        }
        let before = s.open.len();
        s.open.retain(|(sid, o)| !(o.ticket == ticket && sid == strategy_id));
        let closed = s.open.len() < before;
        if closed {
            s.closed.push(ticket);
        }
        Ok(closed)
    }

    async fn close_partial(&self, ticket: Ticket, lot: f64, strategy_id: &str) -> Result<bool> {
        let mut s = self.lock();
        match s
            .open
            .iter_mut()
            .find(|(sid, o)| o.ticket == ticket && sid == strategy_id)
        {
            Some((_, o)) => {
                o.lot_size = ((o.lot_size - lot) * 100.0).round() / 100.0;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_open_orders(&self, symbol: &str, strategy_id: &str) -> Result<Vec<OpenOrder>> {
        Ok(self
            .lock()
            .open
            .iter()
            .filter(|(sid, o)| sid == strategy_id && o.symbol == symbol)
            .map(|(_, o)| o.clone())
            .collect())
    }
}

#[async_trait]
impl AccountService for MockBroker {
    async fn get_balance(&self) -> Result<f64> {
        Ok(self.lock().balance)
    }

    async fn compute_base_lot(&self, _balance: f64, _stop_distance_pips: f64, _symbol: &str) -> Result<f64> {
        Ok(self.lock().base_lot)
    }

    async fn get_spread_pips(&self, _symbol: &str) -> Result<f64> {
        Ok(self.lock().spread)
    }
}

#[async_trait]
impl TrendService for MockBroker {
    async fn get_mtf_alignment(&self, _symbol: &str) -> Result<MtfAlignment> {
        let aligned = self.lock().pulse;
        Ok(MtfAlignment {
            aligned,
            direction: None,
        })
    }

    async fn check_pulse_alignment(&self, _symbol: &str, _direction: Direction) -> Result<bool> {
        Ok(self.lock().pulse)
    }

    async fn check_timeframe_alignment(
        &self,
        _symbol: &str,
        _direction: Direction,
        timeframes: &[Timeframe],
    ) -> Result<bool> {
        let mut s = self.lock();
        s.htf_calls.push(timeframes.to_vec());
        Ok(s.htf_aligned)
    }

    async fn get_market_state(&self, symbol: &str) -> Result<MarketState> {
        Ok(self
            .lock()
            .market
            .get(symbol)
            .copied()
            .unwrap_or(MarketState::TrendingBullish))
    }
}
