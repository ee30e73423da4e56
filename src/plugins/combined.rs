use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    leg_record, log_entry, record_signal, EntryResult, ExitResult, InfoResult, ReversalResult,
    SignalOutcome, StrategyPlugin,
};
use crate::config::CombinedSettings;
use crate::core::dual_order::{DualOrderManager, DualOrderStats};
use crate::core::mtf::{check_alignment, extract_pillars, AlignmentCheck, TrendCache};
use crate::core::routing::SignalRouter;
use crate::core::sizing::{consensus_multiplier, ConsensusSizing, LotSizing, MetalScaling, SizingInput};
use crate::core::symbols::round2;
use crate::models::{
    Direction, EntryKind, ExitKind, InfoKind, Signal, SignalKind, StrategyFamily, TradeStatus,
};
use crate::services::{
    bounded, AccountService, BoundedExecution, OpenOrder, OrderExecution, SymbolLocks,
};
use crate::storage::{
    CombinedTrade, CombinedTradeRepository, ProfitBooking, SignalLogRepository,
};

const DEFAULT_CONSENSUS_SCORE: i32 = 5;

/// External collaborators of the combined strategy.
pub struct CombinedDeps {
    pub executor: Arc<dyn OrderExecution>,
    pub account: Arc<dyn AccountService>,
    pub trend_cache: Arc<dyn TrendCache>,
    pub trades: Arc<dyn CombinedTradeRepository>,
    pub signals: Arc<dyn SignalLogRepository>,
    pub locks: Arc<SymbolLocks>,
    pub order_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CombinedStats {
    pub signals_received: u64,
    pub entries: u64,
    pub exits: u64,
    pub info: u64,
    pub errors: u64,
    pub dual_orders: DualOrderStats,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    entries: AtomicU64,
    exits: AtomicU64,
    info: AtomicU64,
    errors: AtomicU64,
}

/// Everything derived from one settings snapshot. Swapped whole on reload.
struct Runtime {
    settings: CombinedSettings,
    router: SignalRouter,
    sizing: ConsensusSizing,
    dual: DualOrderManager,
}

impl Runtime {
    fn build(settings: &CombinedSettings, router: SignalRouter, dual: DualOrderManager) -> Runtime {
        let mut sizing = ConsensusSizing::new(settings.sizing.clone());
        if settings.metal_lot_scaling {
            sizing = sizing.with_adjustment(Arc::new(MetalScaling::default()));
        }
        Runtime {
            settings: settings.clone(),
            router,
            sizing,
            dual,
        }
    }
}

/// Consensus-scored dual-order strategy: trend filter, tier routing, sizing, A/B pair.
pub struct CombinedPlugin {
    plugin_id: String,
    executor: Arc<dyn OrderExecution>,
    account: Arc<dyn AccountService>,
    trend_cache: Arc<dyn TrendCache>,
    trades: Arc<dyn CombinedTradeRepository>,
    signals: Arc<dyn SignalLogRepository>,
    locks: Arc<SymbolLocks>,
    order_timeout: Duration,
    runtime: RwLock<Arc<Runtime>>,
    counters: Counters,
}

impl CombinedPlugin {
    pub fn new(settings: &CombinedSettings, deps: CombinedDeps) -> Self {
        let executor: Arc<dyn OrderExecution> =
            Arc::new(BoundedExecution::new(deps.executor, deps.order_timeout));
        let dual = DualOrderManager::new(
            settings.dual_order.clone(),
            &settings.plugin_id,
            Arc::clone(&executor),
        );
        info!(
            "Combined plugin {} ready (min alignment {}, metal scaling {})",
            settings.plugin_id, settings.min_alignment, settings.metal_lot_scaling
        );
        Self {
            plugin_id: settings.plugin_id.clone(),
            executor,
            account: deps.account,
            trend_cache: deps.trend_cache,
            trades: deps.trades,
            signals: deps.signals,
            locks: deps.locks,
            order_timeout: deps.order_timeout,
            runtime: RwLock::new(Arc::new(Runtime::build(
                settings,
                SignalRouter::new(settings.routing.clone()),
                dual,
            ))),
            counters: Counters::default(),
        }
    }

    fn runtime(&self) -> Arc<Runtime> {
        match self.runtime.read() {
            Ok(rt) => Arc::clone(&rt),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new settings snapshot. In-flight signals finish on the old one.
    pub fn apply_config(&self, settings: &CombinedSettings) {
        let current = self.runtime();
        let next = Arc::new(Runtime::build(
            settings,
            current.router.reconfigured(settings.routing.clone()),
            current.dual.reconfigured(settings.dual_order.clone()),
        ));
        match self.runtime.write() {
            Ok(mut rt) => *rt = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!("Combined plugin {} reconfigured (enabled={})", self.plugin_id, settings.enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.runtime().settings.enabled
    }

    pub fn router(&self) -> SignalRouter {
        self.runtime().router.clone()
    }

    pub fn stats(&self) -> CombinedStats {
        CombinedStats {
            signals_received: self.counters.received.load(Ordering::Relaxed),
            entries: self.counters.entries.load(Ordering::Relaxed),
            exits: self.counters.exits.load(Ordering::Relaxed),
            info: self.counters.info.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            dual_orders: self.runtime().dual.stats(),
        }
    }

    pub async fn process_entry(&self, signal: &Signal) -> EntryResult {
        let SignalKind::Entry(kind, direction) = signal.kind else {
            return self.skip(signal, "not_an_entry");
        };
        let rt = self.runtime();
        if !rt.settings.enabled {
            return self.skip(signal, "plugin_disabled");
        }
        let _guard = self.locks.acquire(&signal.symbol).await;
        self.enter(&rt, signal, kind, direction).await
    }

    pub async fn process_exit(&self, signal: &Signal) -> ExitResult {
        let SignalKind::Exit(kind) = signal.kind else {
            return ExitResult::failed("not_an_exit");
        };
        let _guard = self.locks.acquire(&signal.symbol).await;
        let result = self.close_side(&signal.symbol, kind.closes(), kind.name()).await;
        self.log_exit(signal, &result);
        result
    }

    /// Close the opposite side, then re-enter in the signal direction. Both
    /// steps run under one symbol lock.
    pub async fn process_reversal(&self, signal: &Signal) -> ReversalResult {
        let Some(direction) = signal.direction() else {
            return ReversalResult {
                exit_result: ExitResult::failed("missing_direction"),
                entry_result: EntryResult::rejected("missing_direction"),
            };
        };
        let _guard = self.locks.acquire(&signal.symbol).await;

        let exit_result = self
            .close_side(&signal.symbol, direction.opposite(), ExitKind::Reversal(direction).name())
            .await;
        self.log_exit(signal, &exit_result);

        let rt = self.runtime();
        let entry_signal = signal.as_entry(EntryKind::LiquidityTrap, direction);
        let entry_result = if rt.settings.enabled {
            self.enter(&rt, &entry_signal, EntryKind::LiquidityTrap, direction).await
        } else {
            self.skip(&entry_signal, "plugin_disabled")
        };

        info!(
            "Reversal {} -> {}: closed {} (pnl {:.2}), re-entry success={}",
            signal.symbol,
            direction,
            exit_result.positions_closed,
            exit_result.total_pnl,
            entry_result.success
        );
        ReversalResult {
            exit_result,
            entry_result,
        }
    }

    /// Book `percent` of every open `side` position on `symbol`.
    pub async fn process_partial_exit(&self, symbol: &str, side: Direction, percent: f64) -> ExitResult {
        if !(percent > 0.0 && percent <= 100.0) {
            return ExitResult::failed("invalid_percentage");
        }
        let _guard = self.locks.acquire(symbol).await;

        let positions = match self.matching_positions(symbol, side).await {
            Ok(p) => p,
            Err(reason) => return ExitResult::failed(&reason),
        };
        if positions.is_empty() {
            return no_matching_positions();
        }

        let mut result = ExitResult {
            success: true,
            ..Default::default()
        };
        for position in positions {
            let close_lot = round2(position.lot_size * percent / 100.0);
            if close_lot <= 0.0 {
                continue;
            }
            match self.executor.close_partial(position.ticket, close_lot, &self.plugin_id).await {
                Ok(true) => {
                    let pnl = round2(position.profit * percent / 100.0);
                    result.positions_closed += 1;
                    result.total_pnl += pnl;
                    self.book_partial(&position, close_lot, pnl, percent);
                }
                Ok(false) => warn!("Partial close of #{} refused", position.ticket),
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!("Partial close of #{} failed: {}", position.ticket, e);
                }
            }
        }
        result.total_pnl = round2(result.total_pnl);
        info!(
            "Partial exit {} {} {:.0}%: {} positions, pnl {:.2}",
            symbol, side, percent, result.positions_closed, result.total_pnl
        );
        result
    }

    pub fn process_info(&self, signal: &Signal) -> InfoResult {
        let SignalKind::Info(kind) = signal.kind else {
            return InfoResult {
                success: false,
                reason: Some("not_info".to_string()),
            };
        };
        self.counters.info.fetch_add(1, Ordering::Relaxed);

        let result = match kind {
            InfoKind::TrendPulse => match signal.mtf.as_deref() {
                Some(raw) => match extract_pillars(raw) {
                    Ok(pillars) => {
                        self.trend_cache.put(&signal.symbol, pillars);
                        info!("Trend pulse {}: {} ({:?})", signal.symbol, pillars.summary(), pillars.values());
                        InfoResult {
                            success: true,
                            reason: None,
                        }
                    }
                    Err(e) => {
                        warn!("Trend pulse for {} rejected: {}", signal.symbol, e);
                        InfoResult {
                            success: false,
                            reason: Some(e.reason().to_string()),
                        }
                    }
                },
                None => InfoResult {
                    success: false,
                    reason: Some("missing_mtf".to_string()),
                },
            },
            InfoKind::VolatilitySqueeze => {
                info!("Volatility squeeze on {} ({})", signal.symbol, signal.timeframe);
                InfoResult {
                    success: true,
                    reason: None,
                }
            }
        };

        let mut entry = log_entry(&self.plugin_id, signal);
        entry.skip_reason = result.reason.clone();
        record_signal(self.signals.as_ref(), entry);
        result
    }

    async fn enter(
        &self,
        rt: &Runtime,
        signal: &Signal,
        kind: EntryKind,
        direction: Direction,
    ) -> EntryResult {
        if kind.is_aggressive() || signal.fresh_entry {
            debug!("{} {}: trend check bypassed", signal.wire_type, signal.symbol);
        } else {
            match check_alignment(
                self.trend_cache.as_ref(),
                &signal.symbol,
                signal.mtf.as_deref(),
                direction,
                rt.settings.min_alignment,
            ) {
                Ok(AlignmentCheck::Misaligned { count, .. }) => {
                    info!(
                        "{} {} {} rejected: {}/4 pillars aligned, need {}",
                        signal.wire_type, signal.symbol, direction, count, rt.settings.min_alignment
                    );
                    return self.skip(signal, "trend_misalignment");
                }
                Ok(AlignmentCheck::NoData) => {
                    debug!("No trend data for {}, entry allowed", signal.symbol);
                }
                Ok(AlignmentCheck::Aligned { .. }) => {}
                Err(e) => {
                    warn!("{} {}: {}", signal.wire_type, signal.symbol, e);
                    return self.skip(signal, e.reason());
                }
            }
        }

        let route = rt.router.route_info(signal);
        rt.router.record(&route);
        let balance = match bounded("get_balance", self.order_timeout, self.account.get_balance()).await {
            Ok(b) => b,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Balance lookup failed for {}: {}", signal.symbol, e);
                return self.skip(signal, e.reason());
            }
        };

        let score = signal.consensus_score.unwrap_or(DEFAULT_CONSENSUS_SCORE);
        let lot = rt.sizing.size(&SizingInput {
            symbol: &signal.symbol,
            balance,
            consensus_score: score,
            tier_multiplier: route.params.lot_multiplier,
            broker_base_lot: None,
        });
        info!(
            "{} {} {} routed {} ({}, {}), lot {:.2} [{}]",
            signal.wire_type,
            signal.symbol,
            direction,
            route.tier,
            route.name,
            route.reason,
            lot,
            rt.sizing.name()
        );

        let pair = rt.dual.place_pair(signal, direction, lot, route.tier).await;
        let placed = pair.any_placed();

        let trade = CombinedTrade {
            id: 0,
            symbol: signal.symbol.clone(),
            direction,
            entry_price: signal.price,
            entry_time: Utc::now(),
            exit_price: None,
            exit_time: None,
            status: if placed { TradeStatus::Open } else { TradeStatus::Closed },
            signal_type: signal.wire_type.clone(),
            signal_timeframe: signal.timeframe.clone(),
            consensus_score: score.clamp(0, 9),
            position_multiplier: consensus_multiplier(score),
            mtf_pillars: signal
                .mtf
                .as_deref()
                .and_then(|raw| extract_pillars(raw).ok())
                .map(|p| p.values()),
            mtf_raw: signal.mtf.clone(),
            logic_route: route.tier,
            logic_multiplier: route.params.lot_multiplier,
            routing_reason: route.reason.to_string(),
            order_a: leg_record(&pair.order_a),
            order_b: leg_record(&pair.order_b),
            total_profit_pips: 0.0,
            total_profit_dollars: 0.0,
        };
        let trade_id = match self.trades.insert_trade(&trade) {
            Ok(id) => Some(id),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Could not persist {} entry: {}", signal.symbol, e);
                None
            }
        };
        if placed {
            self.counters.entries.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.trades.record_daily_entry(Utc::now().date_naive(), route.tier) {
                warn!("Daily stats update failed: {}", e);
            }
        }

        let reason = (!placed).then(|| "order_placement_failed".to_string());
        let mut log = log_entry(&self.plugin_id, signal);
        log.trade_placed = placed;
        log.trade_id = trade_id;
        log.skip_reason = reason.clone();
        record_signal(self.signals.as_ref(), log);

        EntryResult {
            success: placed,
            reason,
            tier: Some(route.tier),
            lot: Some(lot),
            orders: vec![pair.order_a, pair.order_b],
            trade_id,
        }
    }

    async fn matching_positions(
        &self,
        symbol: &str,
        side: Direction,
    ) -> std::result::Result<Vec<OpenOrder>, String> {
        match self.executor.get_open_orders(symbol, &self.plugin_id).await {
            Ok(orders) => Ok(orders.into_iter().filter(|o| o.direction == side).collect()),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Open order lookup failed for {}: {}", symbol, e);
                Err(e.reason().to_string())
            }
        }
    }

    async fn close_side(&self, symbol: &str, side: Direction, label: &str) -> ExitResult {
        let positions = match self.matching_positions(symbol, side).await {
            Ok(p) => p,
            Err(reason) => return ExitResult::failed(&reason),
        };
        if positions.is_empty() {
            info!("{} {}: no {} positions to close", label, symbol, side);
            return no_matching_positions();
        }

        let mut result = ExitResult {
            success: true,
            ..Default::default()
        };
        for position in positions {
            match self.executor.close_order(position.ticket, &self.plugin_id).await {
                Ok(true) => {
                    result.positions_closed += 1;
                    result.total_pnl += position.profit;
                    self.settle_leg(&position);
                }
                Ok(false) => warn!("Close of #{} refused", position.ticket),
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!("Close of #{} failed: {}", position.ticket, e);
                }
            }
        }
        result.total_pnl = round2(result.total_pnl);
        self.counters.exits.fetch_add(1, Ordering::Relaxed);
        info!(
            "{} {}: closed {} {} positions, pnl {:.2}",
            label, symbol, result.positions_closed, side, result.total_pnl
        );
        result
    }

    fn settle_leg(&self, position: &OpenOrder) {
        match self.trades.close_leg(position.ticket, position.current_price, position.profit) {
            Ok(Some(trade)) if trade.status == TradeStatus::Closed => {
                if let Err(e) = self
                    .trades
                    .record_daily_result(Utc::now().date_naive(), trade.total_profit_dollars)
                {
                    warn!("Daily result update failed: {}", e);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => debug!("Ticket #{} has no trade record", position.ticket),
            Err(e) => error!("Could not update trade for #{}: {}", position.ticket, e),
        }
    }

    fn book_partial(&self, position: &OpenOrder, closed_lot: f64, pnl: f64, percent: f64) {
        let trade_id = match self.trades.find_by_ticket(position.ticket) {
            Ok(Some(trade)) => trade.id,
            Ok(None) => return,
            Err(e) => {
                error!("Trade lookup for #{} failed: {}", position.ticket, e);
                return;
            }
        };
        let booking = ProfitBooking {
            trade_id,
            ticket: position.ticket,
            closed_lot,
            remaining_lot: round2(position.lot_size - closed_lot),
            profit_dollars: pnl,
            reason: format!("partial_{:.0}pct", percent),
            booked_at: Utc::now(),
        };
        if let Err(e) = self.trades.record_profit_booking(&booking) {
            error!("Could not record profit booking for #{}: {}", position.ticket, e);
        }
    }

    fn skip(&self, signal: &Signal, reason: &str) -> EntryResult {
        let mut entry = log_entry(&self.plugin_id, signal);
        entry.skip_reason = Some(reason.to_string());
        record_signal(self.signals.as_ref(), entry);
        EntryResult::rejected(reason)
    }

    fn log_exit(&self, signal: &Signal, result: &ExitResult) {
        let mut entry = log_entry(&self.plugin_id, signal);
        entry.skip_reason = result.reason.clone();
        record_signal(self.signals.as_ref(), entry);
    }
}

#[async_trait]
impl StrategyPlugin for CombinedPlugin {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::Combined
    }

    async fn process_signal(&self, signal: &Signal) -> SignalOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match signal.kind {
            SignalKind::Entry(..) => SignalOutcome::Entry(self.process_entry(signal).await),
            SignalKind::Exit(ExitKind::Reversal(_)) => {
                SignalOutcome::Reversal(self.process_reversal(signal).await)
            }
            SignalKind::Exit(_) => SignalOutcome::Exit(self.process_exit(signal).await),
            SignalKind::Info(_) => SignalOutcome::Info(self.process_info(signal)),
        }
    }
}

fn no_matching_positions() -> ExitResult {
    ExitResult {
        success: true,
        positions_closed: 0,
        total_pnl: 0.0,
        reason: Some("no_matching_positions".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mtf::InMemoryTrendCache;
    use crate::core::routing::LogicTier;
    use crate::models::{LegStatus, OrderRole};
    use crate::storage::CombinedDb;
    use crate::test_helpers::{entry_signal, MockBroker};

    struct Harness {
        plugin: CombinedPlugin,
        broker: Arc<MockBroker>,
        db: Arc<CombinedDb>,
        cache: Arc<InMemoryTrendCache>,
    }

    fn harness(settings: CombinedSettings) -> Harness {
        let broker = Arc::new(MockBroker::new());
        let db = Arc::new(CombinedDb::open_in_memory().unwrap());
        let cache = Arc::new(InMemoryTrendCache::new());
        let plugin = CombinedPlugin::new(
            &settings,
            CombinedDeps {
                executor: broker.clone(),
                account: broker.clone(),
                trend_cache: cache.clone(),
                trades: db.clone(),
                signals: db.clone(),
                locks: Arc::new(SymbolLocks::new()),
                order_timeout: Duration::from_secs(5),
            },
        );
        Harness {
            plugin,
            broker,
            db,
            cache,
        }
    }

    fn exit_signal(kind: ExitKind) -> Signal {
        let mut s = entry_signal(EntryKind::MomentumBreakout, Direction::Buy, "15");
        s.kind = SignalKind::Exit(kind);
        s.wire_type = kind.name().to_string();
        s
    }

    fn open_order(ticket: i64, direction: Direction, lot: f64, profit: f64) -> OpenOrder {
        OpenOrder {
            ticket,
            symbol: "EURUSD".into(),
            direction,
            lot_size: lot,
            open_price: 1.1,
            current_price: Some(1.1025),
            profit,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn misaligned_entry_places_nothing() {
        let h = harness(CombinedSettings::default());
        let mut sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "15");
        sig.mtf = Some("1,1,-1,-1,-1,1".into());

        let result = h.plugin.process_entry(&sig).await;
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("trend_misalignment"));
        assert!(h.broker.placed().is_empty());
        assert_eq!(h.db.signal_count("combined_v3").unwrap(), 1);
    }

    #[tokio::test]
    async fn aligned_entry_places_hybrid_pair() {
        let h = harness(CombinedSettings::default());
        let mut sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "15");
        sig.mtf = Some("1,1,1,1,1,-1".into());

        let result = h.plugin.process_entry(&sig).await;
        assert!(result.success);
        assert_eq!(result.tier, Some(LogicTier::Logic2));

        let placed = h.broker.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].sl, Some(1.098));
        assert_eq!(placed[0].tp, Some(1.104));
        assert_eq!(placed[1].sl, Some(1.099));
        assert_eq!(placed[1].tp, Some(1.102));
        assert!(placed[0].comment.starts_with("OrderA_TP_Trail_LOGIC2"));

        let trade = h.db.get_trade(result.trade_id.unwrap()).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.routing_reason, "timeframe:15");
        assert_eq!(trade.mtf_pillars, Some([1, 1, 1, -1]));
        assert!(h.cache.get("EURUSD").is_some());

        let today = Utc::now().date_naive();
        let stats = h.db.daily_stats(today).unwrap().unwrap();
        assert_eq!(stats.logic2_trades, 1);
    }

    #[tokio::test]
    async fn aggressive_entry_skips_trend_check() {
        let h = harness(CombinedSettings::default());
        let mut sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "5");
        sig.mtf = Some("-1,-1,-1,-1,-1,-1".into());

        let result = h.plugin.process_entry(&sig).await;
        assert!(result.success);
        assert_eq!(result.tier, Some(LogicTier::Logic1));
    }

    #[tokio::test]
    async fn malformed_trend_string_is_a_validation_failure() {
        let h = harness(CombinedSettings::default());
        let mut sig = entry_signal(EntryKind::MomentumBreakout, Direction::Sell, "15");
        sig.mtf = Some("1,1,1".into());

        let result = h.plugin.process_entry(&sig).await;
        assert_eq!(result.reason.as_deref(), Some("invalid_mtf_format"));
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn cached_pillars_are_used_without_trend_string() {
        let h = harness(CombinedSettings::default());
        h.cache.put("EURUSD", extract_pillars("1,1,-1,-1,-1,-1").unwrap());
        let sig = entry_signal(EntryKind::MomentumBreakout, Direction::Buy, "15");

        let result = h.plugin.process_entry(&sig).await;
        assert_eq!(result.reason.as_deref(), Some("trend_misalignment"));
    }

    #[tokio::test]
    async fn one_failed_leg_still_succeeds() {
        let h = harness(CombinedSettings::default());
        h.broker.fail_comments_containing("OrderB");
        let sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");

        let result = h.plugin.process_entry(&sig).await;
        assert!(result.success);
        assert!(result.orders[0].placed());
        assert!(!result.orders[1].placed());
        assert_eq!(result.orders[1].role, OrderRole::B);

        let trade = h.db.get_trade(result.trade_id.unwrap()).unwrap().unwrap();
        assert_eq!(trade.order_b.status, LegStatus::Failed);
        assert!(trade.order_b.ticket.is_none());
        assert_eq!(h.plugin.stats().dual_orders.order_b_failed, 1);
    }

    #[tokio::test]
    async fn both_legs_failing_is_reported() {
        let h = harness(CombinedSettings::default());
        h.broker.fail_comments_containing("Order");
        let sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");

        let result = h.plugin.process_entry(&sig).await;
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("order_placement_failed"));
        let trade = h.db.get_trade(result.trade_id.unwrap()).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
    }

    #[tokio::test]
    async fn disabled_plugin_rejects_entries() {
        let h = harness(CombinedSettings {
            enabled: false,
            ..Default::default()
        });
        let sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");
        let result = h.plugin.process_entry(&sig).await;
        assert_eq!(result.reason.as_deref(), Some("plugin_disabled"));
    }

    #[tokio::test]
    async fn exit_without_positions_succeeds() {
        let h = harness(CombinedSettings::default());
        let result = h.plugin.process_exit(&exit_signal(ExitKind::BullishExit)).await;
        assert!(result.success);
        assert_eq!(result.positions_closed, 0);
        assert_eq!(result.reason.as_deref(), Some("no_matching_positions"));
    }

    #[tokio::test]
    async fn exit_closes_only_matching_side() {
        let h = harness(CombinedSettings::default());
        h.broker.add_open("combined_v3", open_order(900, Direction::Buy, 0.1, 25.0));
        h.broker.add_open("combined_v3", open_order(901, Direction::Buy, 0.1, -5.5));
        h.broker.add_open("combined_v3", open_order(902, Direction::Sell, 0.1, 3.0));
        h.broker.add_open("other_plugin", open_order(903, Direction::Buy, 0.1, 1.0));

        let result = h.plugin.process_exit(&exit_signal(ExitKind::BullishExit)).await;
        assert!(result.success);
        assert_eq!(result.positions_closed, 2);
        assert!((result.total_pnl - 19.5).abs() < 1e-9);
        assert_eq!(h.broker.closed(), vec![900, 901]);
    }

    #[tokio::test]
    async fn exit_updates_trade_record() {
        let h = harness(CombinedSettings::default());
        let sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");
        let entry = h.plugin.process_entry(&sig).await;
        let trade_id = entry.trade_id.unwrap();

        let result = h.plugin.process_exit(&exit_signal(ExitKind::BullishExit)).await;
        assert_eq!(result.positions_closed, 2);
        let trade = h.db.get_trade(trade_id).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.order_a.status, LegStatus::Closed);
        assert!(trade.exit_time.is_some());
    }

    #[tokio::test]
    async fn reversal_closes_then_reenters() {
        let h = harness(CombinedSettings::default());
        h.broker.add_open("combined_v3", open_order(700, Direction::Sell, 0.2, 12.0));
        let mut sig = exit_signal(ExitKind::Reversal(Direction::Buy));
        sig.mtf = Some("-1,-1,-1,-1,-1,-1".into());

        let outcome = h.plugin.process_signal(&sig).await;
        let SignalOutcome::Reversal(result) = outcome else {
            panic!("expected reversal outcome");
        };
        assert_eq!(result.exit_result.positions_closed, 1);
        assert!((result.exit_result.total_pnl - 12.0).abs() < 1e-9);
        // Re-entry is a fresh entry, so the bearish trend string does not block it.
        assert!(result.entry_result.success);
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|p| p.direction == Direction::Buy));
    }

    #[tokio::test]
    async fn partial_exit_books_rounded_lot() {
        let h = harness(CombinedSettings::default());
        h.broker.add_open("combined_v3", open_order(500, Direction::Buy, 0.15, 40.0));

        let result = h.plugin.process_partial_exit("EURUSD", Direction::Buy, 50.0).await;
        assert!(result.success);
        assert_eq!(result.positions_closed, 1);
        assert!((result.total_pnl - 20.0).abs() < 1e-9);

        let bad = h.plugin.process_partial_exit("EURUSD", Direction::Buy, 0.0).await;
        assert_eq!(bad.reason.as_deref(), Some("invalid_percentage"));
    }

    #[tokio::test]
    async fn trend_pulse_updates_cache() {
        let h = harness(CombinedSettings::default());
        let mut sig = entry_signal(EntryKind::MomentumBreakout, Direction::Buy, "15");
        sig.kind = SignalKind::Info(InfoKind::TrendPulse);
        sig.wire_type = "Trend_Pulse".into();
        sig.mtf = Some("0,0,1,1,1,1".into());

        let outcome = h.plugin.process_signal(&sig).await;
        assert!(outcome.success());
        assert_eq!(h.cache.get("EURUSD").unwrap().values(), [1, 1, 1, 1]);
        assert_eq!(h.plugin.stats().info, 1);
    }

    #[tokio::test]
    async fn reload_changes_routing_and_keeps_counters() {
        let h = harness(CombinedSettings::default());
        let sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");
        h.plugin.process_entry(&sig).await;

        let mut next = CombinedSettings::default();
        next.routing.default_tier = LogicTier::Logic3;
        next.routing.timeframes.clear();
        h.plugin.apply_config(&next);

        let result = h.plugin.process_entry(&sig).await;
        assert_eq!(result.tier, Some(LogicTier::Logic3));
        assert_eq!(h.plugin.stats().dual_orders.dual_orders_placed, 2);
        assert_eq!(h.plugin.stats().entries, 2);
        assert_eq!(h.plugin.router().statistics().by_timeframe, 1);
        assert_eq!(h.plugin.router().statistics().by_default, 1);
    }

    #[tokio::test]
    async fn gold_entries_are_scaled_when_enabled() {
        let h = harness(CombinedSettings {
            metal_lot_scaling: true,
            ..Default::default()
        });
        let mut sig = entry_signal(EntryKind::LiquidityTrap, Direction::Buy, "15");
        sig.symbol = "XAUUSD".into();

        let result = h.plugin.process_entry(&sig).await;
        // 15k balance -> 0.10 base; score 7 -> 0.8222; LOGIC2 x1.0; metal x0.1 -> clamped 0.01
        assert_eq!(result.lot, Some(0.01));
    }
}
