use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::{AccountService, OpenOrder, OrderExecution, OrderRequest, Ticket};
use crate::core::symbols::{calculate_pnl, round2, SymbolClass};
use crate::error::{BotError, Result};
use crate::models::Direction;

const DEFAULT_SPREAD_PIPS: f64 = 1.0;
/// Fraction of balance risked per trade when the broker sizes a lot.
const DEFAULT_RISK_FRACTION: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct PaperPosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub open_price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub comment: String,
    pub strategy_id: String,
}

struct PaperState {
    balance: f64,
    next_ticket: Ticket,
    positions: Vec<PaperPosition>,
    prices: HashMap<String, f64>,
    spreads: HashMap<String, f64>,
    realized_pnl: f64,
}

/// In-memory broker for local runs: fills at the signal price, marks to the
/// last price set with `set_price`.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    default_spread: f64,
    risk_fraction: f64,
}

impl PaperBroker {
    pub fn new(balance: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                balance,
                next_ticket: 100_000,
                positions: Vec::new(),
                prices: HashMap::new(),
                spreads: HashMap::new(),
                realized_pnl: 0.0,
            }),
            default_spread: DEFAULT_SPREAD_PIPS,
            risk_fraction: DEFAULT_RISK_FRACTION,
        }
    }

    pub fn with_default_spread(mut self, pips: f64) -> Self {
        self.default_spread = pips;
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_spread(&self, symbol: &str, pips: f64) {
        self.lock().spreads.insert(symbol.to_string(), pips);
    }

    pub fn positions(&self) -> Vec<PaperPosition> {
        self.lock().positions.clone()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.lock().realized_pnl
    }

    /// Close `lot` (or everything) of a position; false if the ticket is unknown.
    fn close_lot(&self, ticket: Ticket, lot: Option<f64>, strategy_id: &str) -> bool {
        let mut state = self.lock();
        let Some(idx) = state
            .positions
            .iter()
            .position(|p| p.ticket == ticket && p.strategy_id == strategy_id)
        else {
            return false;
        };

        let remaining = lot.map(|l| round2(state.positions[idx].lot_size - l));
        let closed = match remaining {
            Some(rest) if rest > 0.0 => {
                let mut part = state.positions[idx].clone();
                part.lot_size = round2(part.lot_size - rest);
                state.positions[idx].lot_size = rest;
                part
            }
            _ => state.positions.remove(idx),
        };

        let (_, pnl) = Self::floating(&state, &closed);
        state.balance += pnl;
        state.realized_pnl += pnl;
        info!(
            "[PAPER] closed #{} {} {:.2} lots pnl=${:.2}",
            ticket, closed.symbol, closed.lot_size, pnl
        );
        true
    }

    fn floating(state: &PaperState, pos: &PaperPosition) -> (Option<f64>, f64) {
        match state.prices.get(&pos.symbol) {
            Some(&px) => (
                Some(px),
                calculate_pnl(pos.open_price, px, pos.lot_size, pos.direction, &pos.symbol),
            ),
            None => (None, 0.0),
        }
    }
}

#[async_trait]
impl OrderExecution for PaperBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<Ticket> {
        if request.lot <= 0.0 || !request.lot.is_finite() {
            return Err(BotError::OrderRejected(format!("invalid lot {}", request.lot)));
        }
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.positions.push(PaperPosition {
            ticket,
            symbol: request.symbol.clone(),
            direction: request.direction,
            lot_size: request.lot,
            open_price: request.price,
            sl: request.sl,
            tp: request.tp,
            comment: request.comment.clone(),
            strategy_id: request.strategy_id.clone(),
        });
        info!(
            "[PAPER] #{} {} {} {:.2} @ {:.5} sl={:?} tp={:?} [{}]",
            ticket,
            request.direction,
            request.symbol,
            request.lot,
            request.price,
            request.sl,
            request.tp,
            request.comment
        );
        Ok(ticket)
    }

    async fn close_order(&self, ticket: Ticket, strategy_id: &str) -> Result<bool> {
        Ok(self.close_lot(ticket, None, strategy_id))
    }

    async fn close_partial(&self, ticket: Ticket, lot: f64, strategy_id: &str) -> Result<bool> {
        Ok(self.close_lot(ticket, Some(lot), strategy_id))
    }

    async fn get_open_orders(&self, symbol: &str, strategy_id: &str) -> Result<Vec<OpenOrder>> {
        let state = self.lock();
        Ok(state
            .positions
            .iter()
            .filter(|p| p.symbol == symbol && p.strategy_id == strategy_id)
            .map(|p| {
                let (current_price, profit) = Self::floating(&state, p);
                OpenOrder {
                    ticket: p.ticket,
                    symbol: p.symbol.clone(),
                    direction: p.direction,
                    lot_size: p.lot_size,
                    open_price: p.open_price,
                    current_price,
                    profit,
                    comment: p.comment.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl AccountService for PaperBroker {
    async fn get_balance(&self) -> Result<f64> {
        Ok(self.lock().balance)
    }

    async fn compute_base_lot(&self, balance: f64, stop_distance_pips: f64, symbol: &str) -> Result<f64> {
        if stop_distance_pips <= 0.0 {
            return Err(BotError::Service(format!(
                "stop distance must be positive, got {}",
                stop_distance_pips
            )));
        }
        let risk = balance * self.risk_fraction;
        let per_lot = stop_distance_pips * SymbolClass::of(symbol).pip_value();
        Ok(round2(risk / per_lot))
    }

    async fn get_spread_pips(&self, symbol: &str) -> Result<f64> {
        Ok(self
            .lock()
            .spreads
            .get(symbol)
            .copied()
            .unwrap_or(self.default_spread))
    }
}
