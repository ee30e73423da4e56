use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::core::routing::LogicTier;
use crate::core::sizing::{split_lot, DEFAULT_MIN_LOT, DEFAULT_SPLIT_RATIO};
use crate::core::symbols::SymbolClass;
use crate::models::{Direction, OrderRole, Signal};
use crate::services::{OrderExecution, OrderRequest, Ticket};

pub const DEFAULT_FIXED_STOP_USD: f64 = 10.0;

/// Price distance covered by one dollar of fixed stop, per symbol class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePerDollar {
    pub metal: f64,
    pub yen: f64,
    pub standard: f64,
}

impl Default for PricePerDollar {
    fn default() -> Self {
        Self {
            metal: 1.0,
            yen: 0.01,
            standard: 0.0001,
        }
    }
}

impl PricePerDollar {
    pub fn get(&self, class: SymbolClass) -> f64 {
        match class {
            SymbolClass::Metal => self.metal,
            SymbolClass::Yen => self.yen,
            SymbolClass::Standard => self.standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualOrderConfig {
    pub split_ratio: f64,
    pub min_lot: f64,
    /// Dollar amount of Order B's fixed stop.
    pub order_b_fixed_sl_usd: f64,
    pub price_per_dollar: PricePerDollar,
}

impl Default for DualOrderConfig {
    fn default() -> Self {
        Self {
            split_ratio: DEFAULT_SPLIT_RATIO,
            min_lot: DEFAULT_MIN_LOT,
            order_b_fixed_sl_usd: DEFAULT_FIXED_STOP_USD,
            price_per_dollar: PricePerDollar::default(),
        }
    }
}

impl DualOrderConfig {
    pub fn fixed_stop_distance(&self, symbol: &str) -> f64 {
        self.order_b_fixed_sl_usd * self.price_per_dollar.get(SymbolClass::of(symbol))
    }

    /// Order B's stop: entry moved against the trade by the fixed distance.
    pub fn fixed_stop_price(&self, symbol: &str, direction: Direction, entry: f64) -> f64 {
        let distance = self.fixed_stop_distance(symbol);
        let sl = match direction {
            Direction::Buy => entry - distance,
            Direction::Sell => entry + distance,
        };
        round5(sl)
    }
}

/// How the B leg's stop is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopPolicy {
    /// A keeps the signal stop, B gets the fixed-dollar stop.
    Hybrid,
    /// Both legs use the signal stop.
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegPlan {
    pub role: OrderRole,
    pub lot: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPlan {
    pub order_a: LegPlan,
    pub order_b: LegPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOutcome {
    pub role: OrderRole,
    pub lot: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub ticket: Option<Ticket>,
    pub error: Option<String>,
}

impl LegOutcome {
    pub fn placed(&self) -> bool {
        self.ticket.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub order_a: LegOutcome,
    pub order_b: LegOutcome,
}

impl PairOutcome {
    pub fn any_placed(&self) -> bool {
        self.order_a.placed() || self.order_b.placed()
    }

    pub fn both_placed(&self) -> bool {
        self.order_a.placed() && self.order_b.placed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DualOrderStats {
    pub dual_orders_placed: u64,
    pub order_a_placed: u64,
    pub order_a_failed: u64,
    pub order_b_placed: u64,
    pub order_b_failed: u64,
}

#[derive(Default)]
struct Counters {
    pairs: AtomicU64,
    a_placed: AtomicU64,
    a_failed: AtomicU64,
    b_placed: AtomicU64,
    b_failed: AtomicU64,
}

/// Derives and places the two legs of a dual entry.
pub struct DualOrderManager {
    config: DualOrderConfig,
    strategy_id: String,
    executor: Arc<dyn OrderExecution>,
    counters: Counters,
}

impl DualOrderManager {
    pub fn new(config: DualOrderConfig, strategy_id: &str, executor: Arc<dyn OrderExecution>) -> Self {
        Self {
            config,
            strategy_id: strategy_id.to_string(),
            executor,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DualOrderConfig {
        &self.config
    }

    /// Same executor and running counters, new leg settings.
    pub fn reconfigured(&self, config: DualOrderConfig) -> DualOrderManager {
        let stats = self.stats();
        DualOrderManager {
            config,
            strategy_id: self.strategy_id.clone(),
            executor: Arc::clone(&self.executor),
            counters: Counters {
                pairs: AtomicU64::new(stats.dual_orders_placed),
                a_placed: AtomicU64::new(stats.order_a_placed),
                a_failed: AtomicU64::new(stats.order_a_failed),
                b_placed: AtomicU64::new(stats.order_b_placed),
                b_failed: AtomicU64::new(stats.order_b_failed),
            },
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    /// Pure derivation of both legs for `total_lot`.
    pub fn plan_pair(
        &self,
        signal: &Signal,
        direction: Direction,
        total_lot: f64,
        tier: LogicTier,
        policy: StopPolicy,
    ) -> PairPlan {
        let (lot_a, lot_b) = split_lot(total_lot, self.config.split_ratio, self.config.min_lot);
        let order_b_sl = match policy {
            StopPolicy::Hybrid => Some(self.config.fixed_stop_price(
                &signal.symbol,
                direction,
                signal.price,
            )),
            StopPolicy::Shared => signal.sl,
        };

        PairPlan {
            order_a: LegPlan {
                role: OrderRole::A,
                lot: lot_a,
                sl: signal.sl,
                tp: signal.extended_target(),
                comment: format!("OrderA_TP_Trail_{}", tier),
            },
            order_b: LegPlan {
                role: OrderRole::B,
                lot: lot_b,
                sl: order_b_sl,
                tp: signal.tp1,
                comment: format!("OrderB_Profit_Trail_{}", tier),
            },
        }
    }

    /// Hybrid-stop pair for the combined strategy.
    pub async fn place_pair(
        &self,
        signal: &Signal,
        direction: Direction,
        total_lot: f64,
        tier: LogicTier,
    ) -> PairOutcome {
        let plan = self.plan_pair(signal, direction, total_lot, tier, StopPolicy::Hybrid);
        self.place_plan(signal, direction, &plan).await
    }

    /// Both legs are always attempted; one failing never blocks the other.
    pub async fn place_plan(&self, signal: &Signal, direction: Direction, plan: &PairPlan) -> PairOutcome {
        let order_a = self.place_leg(signal, direction, &plan.order_a).await;
        let order_b = self.place_leg(signal, direction, &plan.order_b).await;

        let pair = PairOutcome { order_a, order_b };
        // A pair counts only when both legs are live; single-leg failures are tallied per leg.
        if pair.both_placed() {
            self.counters.pairs.fetch_add(1, Ordering::Relaxed);
        }
        let PairOutcome { order_a, order_b } = &pair;
        info!(
            "Dual order {} {}: A={:?} ({:.2} lots, sl={:?}, tp={:?}) B={:?} ({:.2} lots, sl={:?}, tp={:?})",
            signal.symbol,
            direction,
            order_a.ticket,
            order_a.lot,
            order_a.sl,
            order_a.tp,
            order_b.ticket,
            order_b.lot,
            order_b.sl,
            order_b.tp
        );
        pair
    }

    pub async fn place_leg(&self, signal: &Signal, direction: Direction, leg: &LegPlan) -> LegOutcome {
        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            direction,
            lot: leg.lot,
            price: signal.price,
            sl: leg.sl,
            tp: leg.tp,
            comment: leg.comment.clone(),
            strategy_id: self.strategy_id.clone(),
        };

        let (ticket, err) = match self.executor.place_order(&request).await {
            Ok(ticket) => (Some(ticket), None),
            Err(e) => {
                error!("Order {} placement failed for {}: {}", leg.role, signal.symbol, e);
                (None, Some(e.to_string()))
            }
        };

        let (placed, failed) = match leg.role {
            OrderRole::A => (&self.counters.a_placed, &self.counters.a_failed),
            OrderRole::B => (&self.counters.b_placed, &self.counters.b_failed),
        };
        if ticket.is_some() {
            placed.fetch_add(1, Ordering::Relaxed);
        } else {
            failed.fetch_add(1, Ordering::Relaxed);
        }

        LegOutcome {
            role: leg.role,
            lot: leg.lot,
            sl: leg.sl,
            tp: leg.tp,
            ticket,
            error: err,
        }
    }

    pub fn stats(&self) -> DualOrderStats {
        DualOrderStats {
            dual_orders_placed: self.counters.pairs.load(Ordering::Relaxed),
            order_a_placed: self.counters.a_placed.load(Ordering::Relaxed),
            order_a_failed: self.counters.a_failed.load(Ordering::Relaxed),
            order_b_placed: self.counters.b_placed.load(Ordering::Relaxed),
            order_b_failed: self.counters.b_failed.load(Ordering::Relaxed),
        }
    }
}

pub fn round5(v: f64) -> f64 {
    (v * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryKind;
    use crate::test_helpers::{entry_signal, MockBroker};

    fn gold_signal() -> Signal {
        let mut s = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "5");
        s.symbol = "XAUUSD".into();
        s.price = 2000.0;
        s.sl = Some(1990.0);
        s.tp1 = Some(2005.0);
        s.tp2 = Some(2010.0);
        s
    }

    #[test]
    fn fixed_stop_per_symbol_class() {
        let cfg = DualOrderConfig::default();
        assert!((cfg.fixed_stop_price("XAUUSD", Direction::Buy, 2000.0) - 1990.0).abs() < 1e-9);
        assert!((cfg.fixed_stop_price("USDJPY", Direction::Sell, 150.0) - 150.10).abs() < 1e-9);
        assert!((cfg.fixed_stop_price("EURUSD", Direction::Buy, 1.1000) - 1.0990).abs() < 1e-9);
        assert!((cfg.fixed_stop_price("EURUSD", Direction::Sell, 1.1000) - 1.1010).abs() < 1e-9);
    }

    #[test]
    fn hybrid_plan_diverges_stops() {
        let mgr = DualOrderManager::new(
            DualOrderConfig {
                order_b_fixed_sl_usd: 5.0,
                ..DualOrderConfig::default()
            },
            "combined_v3",
            Arc::new(MockBroker::new()),
        );
        let sig = gold_signal();
        let plan = mgr.plan_pair(&sig, Direction::Buy, 0.2, LogicTier::Logic1, StopPolicy::Hybrid);
        assert_eq!(plan.order_a.sl, Some(1990.0));
        assert_eq!(plan.order_a.tp, Some(2010.0));
        assert_eq!(plan.order_b.sl, Some(1995.0));
        assert_eq!(plan.order_b.tp, Some(2005.0));
        assert_eq!(plan.order_a.comment, "OrderA_TP_Trail_LOGIC1");
        assert_eq!(plan.order_b.comment, "OrderB_Profit_Trail_LOGIC1");
        assert!((plan.order_a.lot - 0.1).abs() < 1e-9);
    }

    #[test]
    fn shared_plan_reuses_signal_stop() {
        let mgr = DualOrderManager::new(DualOrderConfig::default(), "pa", Arc::new(MockBroker::new()));
        let sig = gold_signal();
        let plan = mgr.plan_pair(&sig, Direction::Buy, 0.2, LogicTier::Logic2, StopPolicy::Shared);
        assert_eq!(plan.order_a.sl, plan.order_b.sl);
    }

    #[test]
    fn extended_target_falls_back_to_tp1() {
        let mgr = DualOrderManager::new(DualOrderConfig::default(), "c", Arc::new(MockBroker::new()));
        let mut sig = gold_signal();
        sig.tp2 = None;
        let plan = mgr.plan_pair(&sig, Direction::Buy, 0.2, LogicTier::Logic1, StopPolicy::Hybrid);
        assert_eq!(plan.order_a.tp, Some(2005.0));
    }

    #[tokio::test]
    async fn one_leg_failure_does_not_block_other() {
        let broker = Arc::new(MockBroker::new());
        broker.fail_comments_containing("OrderA");
        let mgr = DualOrderManager::new(DualOrderConfig::default(), "combined_v3", broker.clone());
        let out = mgr.place_pair(&gold_signal(), Direction::Buy, 0.2, LogicTier::Logic1).await;

        assert!(!out.order_a.placed());
        assert!(out.order_a.error.is_some());
        assert!(out.order_b.placed());
        assert_eq!(broker.placed().len(), 1);

        let stats = mgr.stats();
        assert_eq!(stats.order_a_failed, 1);
        assert_eq!(stats.order_b_placed, 1);
        assert_eq!(stats.dual_orders_placed, 0);

        let mgr = DualOrderManager::new(DualOrderConfig::default(), "combined_v3", Arc::new(MockBroker::new()));
        let out = mgr.place_pair(&gold_signal(), Direction::Buy, 0.2, LogicTier::Logic1).await;
        assert!(out.both_placed());
        assert_eq!(mgr.stats().dual_orders_placed, 1);
    }
}
