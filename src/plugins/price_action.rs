use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    leg_record, log_entry, record_signal, EntryResult, ExitResult, InfoResult, ReversalResult,
    SignalOutcome, StrategyPlugin,
};
use crate::config::{PriceActionSettings, VariantSettings};
use crate::core::dual_order::{DualOrderManager, LegOutcome, LegPlan, StopPolicy};
use crate::core::routing::LogicTier;
use crate::core::sizing::{LotBounds, LotSizing, RiskMultiplierSizing, SizingInput};
use crate::core::symbols::{price_to_pips, round2};
use crate::models::{
    Direction, EntryKind, ExitKind, MarketState, OrderRole, OrderShape,
    PriceActionVariant, Signal, SignalKind, StrategyFamily, Timeframe, TradeStatus, TrendStrength,
};
use crate::services::{
    bounded, AccountService, BoundedExecution, OpenOrder, OrderExecution, SymbolLocks, Ticket,
    TrendService,
};
use crate::storage::{PriceActionTrade, PriceActionTradeRepository, SignalLogRepository};

pub const PRICE_ACTION_FAMILY_ID: &str = "price_action";

const HIGH_ADX_WARNING: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeProfit {
    Tp1,
    Tp2,
    Tp3,
}

impl TakeProfit {
    fn pick(self, signal: &Signal) -> Option<f64> {
        match self {
            TakeProfit::Tp1 => signal.tp1,
            TakeProfit::Tp2 => signal.tp2.or(signal.tp1),
            TakeProfit::Tp3 => signal.tp3.or(signal.tp2).or(signal.tp1),
        }
    }
}

/// Variant-specific gate run after the shared threshold checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraCheck {
    RejectWeakStrength,
    TimeframeAlignment(&'static [Timeframe]),
    MarketState,
    PulseAlignment,
    WarnHighAdx,
}

/// Fixed shape of one price-action variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantRules {
    pub variant: PriceActionVariant,
    pub shape: OrderShape,
    /// Target of the single leg, or of leg A for the dual shape.
    pub target: TakeProfit,
    pub checks: &'static [ExtraCheck],
    pub default_sl_pips: f64,
    pub sl_multiplier: f64,
    pub max_hold_minutes: u32,
    pub breakeven_after_tp1: bool,
}

impl VariantRules {
    pub fn for_variant(variant: PriceActionVariant) -> VariantRules {
        match variant {
            PriceActionVariant::M1 => VariantRules {
                variant,
                shape: OrderShape::OrderBOnly,
                target: TakeProfit::Tp1,
                checks: &[],
                default_sl_pips: 15.0,
                sl_multiplier: 0.5,
                max_hold_minutes: 60,
                breakeven_after_tp1: false,
            },
            PriceActionVariant::M5 => VariantRules {
                variant,
                shape: OrderShape::Dual,
                target: TakeProfit::Tp2,
                checks: &[
                    ExtraCheck::RejectWeakStrength,
                    ExtraCheck::TimeframeAlignment(&[Timeframe::M15]),
                ],
                default_sl_pips: 20.0,
                sl_multiplier: 1.0,
                max_hold_minutes: 240,
                breakeven_after_tp1: true,
            },
            PriceActionVariant::M15 => VariantRules {
                variant,
                shape: OrderShape::OrderAOnly,
                target: TakeProfit::Tp2,
                checks: &[ExtraCheck::MarketState, ExtraCheck::PulseAlignment],
                default_sl_pips: 25.0,
                sl_multiplier: 1.5,
                max_hold_minutes: 480,
                breakeven_after_tp1: false,
            },
            PriceActionVariant::H1 => VariantRules {
                variant,
                shape: OrderShape::OrderAOnly,
                target: TakeProfit::Tp3,
                checks: &[
                    ExtraCheck::MarketState,
                    ExtraCheck::TimeframeAlignment(&[Timeframe::H4, Timeframe::D1]),
                    ExtraCheck::WarnHighAdx,
                ],
                default_sl_pips: 40.0,
                sl_multiplier: 2.0,
                max_hold_minutes: 1440,
                breakeven_after_tp1: false,
            },
        }
    }

    /// `|price - sl| * 10`, or the variant default when the signal has no stop.
    pub fn stop_distance_pips(&self, signal: &Signal) -> f64 {
        signal
            .sl
            .map(|sl| (signal.price - sl).abs() * 10.0)
            .filter(|pips| *pips > 0.0)
            .unwrap_or(self.default_sl_pips)
    }
}

pub struct PriceActionDeps {
    pub executor: Arc<dyn OrderExecution>,
    pub account: Arc<dyn AccountService>,
    pub trend: Arc<dyn TrendService>,
    pub trades: Arc<dyn PriceActionTradeRepository>,
    pub signals: Arc<dyn SignalLogRepository>,
    pub locks: Arc<SymbolLocks>,
    pub order_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct VariantStats {
    pub signals_received: u64,
    pub entries: u64,
    pub rejected: u64,
    pub exits: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    entries: AtomicU64,
    rejected: AtomicU64,
    exits: AtomicU64,
    errors: AtomicU64,
}

/// Context gathered while gating an entry; persisted with the trade.
#[derive(Debug, Default)]
struct GateContext {
    market_state: Option<MarketState>,
    htf_aligned: Option<bool>,
}

/// One timeframe variant of the price-action family.
pub struct PriceActionPlugin {
    rules: VariantRules,
    executor: Arc<dyn OrderExecution>,
    account: Arc<dyn AccountService>,
    trend: Arc<dyn TrendService>,
    trades: Arc<dyn PriceActionTradeRepository>,
    signals: Arc<dyn SignalLogRepository>,
    locks: Arc<SymbolLocks>,
    order_timeout: Duration,
    settings: RwLock<VariantSettings>,
    orders: RwLock<Arc<DualOrderManager>>,
    counters: Counters,
}

impl PriceActionPlugin {
    pub fn new(variant: PriceActionVariant, settings: &PriceActionSettings, deps: &PriceActionDeps) -> Self {
        let executor: Arc<dyn OrderExecution> = Arc::new(BoundedExecution::new(
            Arc::clone(&deps.executor),
            deps.order_timeout,
        ));
        let orders = DualOrderManager::new(
            settings.dual_order.clone(),
            variant.plugin_id(),
            Arc::clone(&executor),
        );
        Self {
            rules: VariantRules::for_variant(variant),
            executor,
            account: Arc::clone(&deps.account),
            trend: Arc::clone(&deps.trend),
            trades: Arc::clone(&deps.trades),
            signals: Arc::clone(&deps.signals),
            locks: Arc::clone(&deps.locks),
            order_timeout: deps.order_timeout,
            settings: RwLock::new(settings.variant(variant)),
            orders: RwLock::new(Arc::new(orders)),
            counters: Counters::default(),
        }
    }

    pub fn variant(&self) -> PriceActionVariant {
        self.rules.variant
    }

    pub fn rules(&self) -> &VariantRules {
        &self.rules
    }

    pub fn settings(&self) -> VariantSettings {
        match self.settings.read() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn orders(&self) -> Arc<DualOrderManager> {
        match self.orders.read() {
            Ok(o) => Arc::clone(&o),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn apply_config(&self, settings: &PriceActionSettings) {
        let next = settings.variant(self.rules.variant);
        match self.settings.write() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        let orders = Arc::new(self.orders().reconfigured(settings.dual_order.clone()));
        match self.orders.write() {
            Ok(mut o) => *o = orders,
            Err(poisoned) => *poisoned.into_inner() = orders,
        }
        info!(
            "{} reconfigured: enabled={} min_adx={} min_conf={} max_spread={} risk={}",
            self.rules.variant, next.enabled, next.min_adx, next.min_confidence, next.max_spread_pips, next.risk_multiplier
        );
    }

    pub fn stats(&self) -> VariantStats {
        VariantStats {
            signals_received: self.counters.received.load(Ordering::Relaxed),
            entries: self.counters.entries.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            exits: self.counters.exits.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn process_entry(&self, signal: &Signal) -> EntryResult {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let SignalKind::Entry(_, direction) = signal.kind else {
            return self.skip(signal, "not_an_entry");
        };
        let settings = self.settings();
        if !settings.enabled {
            return self.skip(signal, "plugin_disabled");
        }
        let _guard = self.locks.acquire(&signal.symbol).await;
        self.enter(signal, direction, &settings).await
    }

    pub async fn process_exit(&self, signal: &Signal) -> ExitResult {
        let SignalKind::Exit(kind) = signal.kind else {
            return ExitResult::failed("not_an_exit");
        };
        let _guard = self.locks.acquire(&signal.symbol).await;
        self.close_side(signal, kind.closes()).await
    }

    pub async fn process_reversal(&self, signal: &Signal) -> ReversalResult {
        let Some(direction) = signal.direction() else {
            return ReversalResult {
                exit_result: ExitResult::failed("missing_direction"),
                entry_result: EntryResult::rejected("missing_direction"),
            };
        };
        let _guard = self.locks.acquire(&signal.symbol).await;
        let exit_result = self.close_side(signal, direction.opposite()).await;

        let settings = self.settings();
        let entry_signal = signal.as_entry(EntryKind::LiquidityTrap, direction);
        let entry_result = if settings.enabled {
            self.enter(&entry_signal, direction, &settings).await
        } else {
            self.skip(&entry_signal, "plugin_disabled")
        };
        ReversalResult {
            exit_result,
            entry_result,
        }
    }

    async fn enter(&self, signal: &Signal, direction: Direction, settings: &VariantSettings) -> EntryResult {
        let gate = match self.run_checks(signal, direction, settings).await {
            Ok(gate) => gate,
            Err(reason) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return self.skip(signal, &reason);
            }
        };

        let lot = match self.size(signal, settings).await {
            Ok(lot) => lot,
            Err(reason) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return self.skip(signal, &reason);
            }
        };

        let (order_a, order_b) = self.place(signal, direction, lot).await;
        let placed = order_a.as_ref().map_or(false, LegOutcome::placed)
            || order_b.as_ref().map_or(false, LegOutcome::placed);

        let trade = PriceActionTrade {
            id: 0,
            variant: self.rules.variant,
            symbol: signal.symbol.clone(),
            direction,
            entry_price: signal.price,
            entry_time: Utc::now(),
            exit_price: None,
            exit_time: None,
            status: if placed { TradeStatus::Open } else { TradeStatus::Closed },
            signal_type: signal.wire_type.clone(),
            order_a: order_a.as_ref().map(leg_record),
            order_b: order_b.as_ref().map(leg_record),
            adx: signal.adx,
            confidence: signal.confidence,
            market_state: gate.market_state,
            htf_aligned: gate.htf_aligned,
            sl_multiplier: self.rules.sl_multiplier,
            max_hold_minutes: self.rules.max_hold_minutes,
            breakeven_after_tp1: self.rules.breakeven_after_tp1,
            profit_pips: 0.0,
            profit_dollars: 0.0,
        };
        let trade_id = match self.trades.insert_trade(&trade) {
            Ok(id) => Some(id),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("Could not persist {} entry for {}: {}", self.rules.variant, signal.symbol, e);
                None
            }
        };
        if placed {
            self.counters.entries.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self
                .trades
                .record_daily_entry(Utc::now().date_naive(), self.rules.variant)
            {
                warn!("Daily stats update failed: {}", e);
            }
        }

        let reason = (!placed).then(|| "order_placement_failed".to_string());
        let mut log = log_entry(self.rules.variant.plugin_id(), signal);
        log.trade_placed = placed;
        log.trade_id = trade_id;
        log.skip_reason = reason.clone();
        record_signal(self.signals.as_ref(), log);

        info!(
            "{} {} {} {} lot {:.2}: placed={}",
            self.rules.variant, self.rules.shape, signal.symbol, direction, lot, placed
        );
        EntryResult {
            success: placed,
            reason,
            tier: None,
            lot: Some(lot),
            orders: order_a.into_iter().chain(order_b).collect(),
            trade_id,
        }
    }

    /// Every condition must hold; the first failure short-circuits with its reason.
    async fn run_checks(
        &self,
        signal: &Signal,
        direction: Direction,
        settings: &VariantSettings,
    ) -> std::result::Result<GateContext, String> {
        let variant = self.rules.variant;
        let adx = signal.adx.unwrap_or(0.0);
        if adx < settings.min_adx {
            info!("{} {} rejected: ADX {:.1} < {:.1}", variant, signal.symbol, adx, settings.min_adx);
            return Err("adx_below_threshold".to_string());
        }
        let confidence = signal.confidence.unwrap_or(0);
        if confidence < settings.min_confidence {
            info!(
                "{} {} rejected: confidence {} < {}",
                variant, signal.symbol, confidence, settings.min_confidence
            );
            return Err("confidence_below_threshold".to_string());
        }
        let spread = bounded(
            "get_spread_pips",
            self.order_timeout,
            self.account.get_spread_pips(&signal.symbol),
        )
        .await
        .map_err(|e| e.reason().to_string())?;
        if spread > settings.max_spread_pips {
            info!(
                "{} {} rejected: spread {:.1} > {:.1} pips",
                variant, signal.symbol, spread, settings.max_spread_pips
            );
            return Err("spread_too_wide".to_string());
        }

        let mut gate = GateContext::default();
        for check in self.rules.checks {
            match check {
                ExtraCheck::RejectWeakStrength => {
                    if signal.adx_strength == Some(TrendStrength::Weak) {
                        info!("{} {} rejected: weak trend strength", variant, signal.symbol);
                        return Err("weak_trend_strength".to_string());
                    }
                }
                ExtraCheck::TimeframeAlignment(timeframes) => {
                    let aligned = bounded(
                        "check_timeframe_alignment",
                        self.order_timeout,
                        self.trend.check_timeframe_alignment(&signal.symbol, direction, timeframes),
                    )
                    .await
                    .map_err(|e| e.reason().to_string())?;
                    gate.htf_aligned = Some(aligned);
                    if !aligned {
                        info!(
                            "{} {} rejected: {:?} not aligned {}",
                            variant, signal.symbol, timeframes, direction
                        );
                        return Err("timeframe_misalignment".to_string());
                    }
                }
                ExtraCheck::MarketState => {
                    let state = bounded(
                        "get_market_state",
                        self.order_timeout,
                        self.trend.get_market_state(&signal.symbol),
                    )
                    .await
                    .map_err(|e| e.reason().to_string())?;
                    gate.market_state = Some(state);
                    if !state.permits(direction) {
                        info!("{} {} rejected: market {} vs {}", variant, signal.symbol, state, direction);
                        return Err("market_state_conflict".to_string());
                    }
                }
                ExtraCheck::PulseAlignment => {
                    let aligned = bounded(
                        "check_pulse_alignment",
                        self.order_timeout,
                        self.trend.check_pulse_alignment(&signal.symbol, direction),
                    )
                    .await
                    .map_err(|e| e.reason().to_string())?;
                    if !aligned {
                        info!("{} {} rejected: pulse not aligned {}", variant, signal.symbol, direction);
                        return Err("pulse_misalignment".to_string());
                    }
                }
                ExtraCheck::WarnHighAdx => {
                    if adx > HIGH_ADX_WARNING {
                        warn!("{} {}: ADX {:.1} is extended, possible exhaustion", variant, signal.symbol, adx);
                    }
                }
            }
        }
        Ok(gate)
    }

    async fn size(&self, signal: &Signal, settings: &VariantSettings) -> std::result::Result<f64, String> {
        let balance = bounded("get_balance", self.order_timeout, self.account.get_balance())
            .await
            .map_err(|e| e.reason().to_string())?;
        let pips = self.rules.stop_distance_pips(signal);
        let base = bounded(
            "compute_base_lot",
            self.order_timeout,
            self.account.compute_base_lot(balance, pips, &signal.symbol),
        )
        .await
        .map_err(|e| e.reason().to_string())?;

        let bounds = LotBounds {
            min_lot: self.orders().config().min_lot,
            ..LotBounds::default()
        };
        let sizing = RiskMultiplierSizing::new(settings.risk_multiplier, bounds);
        let lot = sizing.size(&SizingInput {
            symbol: &signal.symbol,
            balance,
            consensus_score: 0,
            tier_multiplier: 1.0,
            broker_base_lot: Some(base),
        });
        debug!(
            "{} {}: base {:.2} x {} = {:.2} ({} pips) [{}]",
            self.rules.variant,
            signal.symbol,
            base,
            sizing.risk_multiplier(),
            lot,
            pips,
            sizing.name()
        );
        Ok(lot)
    }

    async fn place(&self, signal: &Signal, direction: Direction, lot: f64) -> (Option<LegOutcome>, Option<LegOutcome>) {
        let orders = self.orders();
        let label = self.rules.variant.plugin_id();
        match self.rules.shape {
            OrderShape::OrderBOnly => {
                let leg = LegPlan {
                    role: OrderRole::B,
                    lot,
                    sl: signal.sl,
                    tp: self.rules.target.pick(signal),
                    comment: format!("{}_OrderB", label),
                };
                (None, Some(orders.place_leg(signal, direction, &leg).await))
            }
            OrderShape::OrderAOnly => {
                let leg = LegPlan {
                    role: OrderRole::A,
                    lot,
                    sl: signal.sl,
                    tp: self.rules.target.pick(signal),
                    comment: format!("{}_OrderA", label),
                };
                (Some(orders.place_leg(signal, direction, &leg).await), None)
            }
            OrderShape::Dual => {
                let mut plan = orders.plan_pair(signal, direction, lot, LogicTier::Logic1, StopPolicy::Shared);
                plan.order_a.tp = self.rules.target.pick(signal);
                plan.order_a.comment = format!("{}_OrderA", label);
                plan.order_b.comment = format!("{}_OrderB", label);
                let pair = orders.place_plan(signal, direction, &plan).await;
                (Some(pair.order_a), Some(pair.order_b))
            }
        }
    }

    async fn close_side(&self, signal: &Signal, side: Direction) -> ExitResult {
        let variant = self.rules.variant;
        let positions: Vec<OpenOrder> = match self.executor.get_open_orders(&signal.symbol, variant.plugin_id()).await {
            Ok(orders) => orders.into_iter().filter(|o| o.direction == side).collect(),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                error!("{} open order lookup failed for {}: {}", variant, signal.symbol, e);
                return ExitResult::failed(e.reason());
            }
        };
        if positions.is_empty() {
            return ExitResult {
                success: true,
                reason: Some("no_matching_positions".to_string()),
                ..Default::default()
            };
        }

        let mut closed: HashMap<Ticket, &OpenOrder> = HashMap::new();
        for position in &positions {
            match self.executor.close_order(position.ticket, variant.plugin_id()).await {
                Ok(true) => {
                    closed.insert(position.ticket, position);
                }
                Ok(false) => warn!("{} close of #{} refused", variant, position.ticket),
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    error!("{} close of #{} failed: {}", variant, position.ticket, e);
                }
            }
        }
        let total_pnl = round2(closed.values().map(|p| p.profit).sum());
        self.settle_trades(signal, side, &closed);
        self.counters.exits.fetch_add(1, Ordering::Relaxed);

        info!(
            "{} exit {} {}: closed {}, pnl {:.2}",
            variant,
            signal.symbol,
            side,
            closed.len(),
            total_pnl
        );
        ExitResult {
            success: true,
            positions_closed: closed.len(),
            total_pnl,
            reason: None,
        }
    }

    fn settle_trades(&self, signal: &Signal, side: Direction, closed: &HashMap<Ticket, &OpenOrder>) {
        let variant = self.rules.variant;
        let trades = match self.trades.open_trades(variant, &signal.symbol) {
            Ok(t) => t,
            Err(e) => {
                error!("{} trade lookup failed for {}: {}", variant, signal.symbol, e);
                return;
            }
        };
        for trade in trades.into_iter().filter(|t| t.direction == side) {
            let legs: Vec<&OpenOrder> = [trade.order_a.as_ref(), trade.order_b.as_ref()]
                .into_iter()
                .flatten()
                .filter_map(|leg| leg.ticket.and_then(|t| closed.get(&t).copied()))
                .collect();
            if legs.is_empty() {
                continue;
            }
            let tickets: Vec<Ticket> = legs.iter().map(|p| p.ticket).collect();
            let dollars = round2(legs.iter().map(|p| p.profit).sum());
            let exit = legs
                .iter()
                .find_map(|p| p.current_price)
                .unwrap_or(signal.price);
            let moved = (exit - trade.entry_price) * side.pillar_sign() as f64;
            let pips = round2(price_to_pips(moved, &trade.symbol).copysign(moved));
            match self.trades.close_legs(variant, trade.id, &tickets, exit, pips, dollars) {
                Ok(Some(t)) if t.status != TradeStatus::Closed => {
                    warn!("{} trade {} left {} with a leg still open", variant, t.id, t.status)
                }
                Ok(_) => {}
                Err(e) => error!("{} could not close trade {}: {}", variant, trade.id, e),
            }
        }
    }

    fn skip(&self, signal: &Signal, reason: &str) -> EntryResult {
        let mut entry = log_entry(self.rules.variant.plugin_id(), signal);
        entry.skip_reason = Some(reason.to_string());
        record_signal(self.signals.as_ref(), entry);
        EntryResult::rejected(reason)
    }
}

/// The four variants behind one family entry point, selected by timeframe.
pub struct PriceActionPlugins {
    variants: Vec<PriceActionPlugin>,
    signals: Arc<dyn SignalLogRepository>,
}

impl PriceActionPlugins {
    pub fn new(settings: &PriceActionSettings, deps: PriceActionDeps) -> Self {
        let variants = PriceActionVariant::ALL
            .iter()
            .map(|v| PriceActionPlugin::new(*v, settings, &deps))
            .collect();
        info!("Price action plugins ready: {:?}", PriceActionVariant::ALL.map(|v| v.plugin_id()));
        Self {
            variants,
            signals: deps.signals,
        }
    }

    pub fn variants(&self) -> &[PriceActionPlugin] {
        &self.variants
    }

    pub fn get(&self, variant: PriceActionVariant) -> Option<&PriceActionPlugin> {
        self.variants.iter().find(|p| p.variant() == variant)
    }

    pub fn for_signal(&self, signal: &Signal) -> Option<&PriceActionPlugin> {
        signal
            .parsed_timeframe()
            .and_then(PriceActionVariant::for_timeframe)
            .and_then(|v| self.get(v))
    }

    pub fn apply_config(&self, settings: &PriceActionSettings) {
        for plugin in &self.variants {
            plugin.apply_config(settings);
        }
    }

    fn unsupported(&self, signal: &Signal) -> EntryResult {
        let mut entry = log_entry(PRICE_ACTION_FAMILY_ID, signal);
        entry.skip_reason = Some("unsupported_timeframe".to_string());
        record_signal(self.signals.as_ref(), entry);
        warn!("No price action variant for {} timeframe {}", signal.symbol, signal.timeframe);
        EntryResult::rejected("unsupported_timeframe")
    }

    /// Exits on an unmapped timeframe sweep every variant.
    async fn exit_all(&self, signal: &Signal) -> ExitResult {
        let mut total = ExitResult {
            success: true,
            ..Default::default()
        };
        for plugin in &self.variants {
            let r = plugin.process_exit(signal).await;
            total.success &= r.success;
            total.positions_closed += r.positions_closed;
            total.total_pnl += r.total_pnl;
            if !r.success {
                total.reason = r.reason;
            }
        }
        total.total_pnl = round2(total.total_pnl);
        if total.success && total.positions_closed == 0 {
            total.reason = Some("no_matching_positions".to_string());
        }
        total
    }
}

#[async_trait]
impl StrategyPlugin for PriceActionPlugins {
    fn plugin_id(&self) -> &str {
        PRICE_ACTION_FAMILY_ID
    }

    fn family(&self) -> StrategyFamily {
        StrategyFamily::PriceAction
    }

    async fn process_signal(&self, signal: &Signal) -> SignalOutcome {
        let plugin = self.for_signal(signal);
        match (signal.kind, plugin) {
            (SignalKind::Entry(..), Some(p)) => SignalOutcome::Entry(p.process_entry(signal).await),
            (SignalKind::Entry(..), None) => SignalOutcome::Entry(self.unsupported(signal)),
            (SignalKind::Exit(ExitKind::Reversal(_)), Some(p)) => {
                SignalOutcome::Reversal(p.process_reversal(signal).await)
            }
            (SignalKind::Exit(ExitKind::Reversal(_)), None) => SignalOutcome::Reversal(ReversalResult {
                exit_result: self.exit_all(signal).await,
                entry_result: self.unsupported(signal),
            }),
            (SignalKind::Exit(_), Some(p)) => SignalOutcome::Exit(p.process_exit(signal).await),
            (SignalKind::Exit(_), None) => SignalOutcome::Exit(self.exit_all(signal).await),
            (SignalKind::Info(kind), _) => {
                debug!("Price action ignores {} for {}", kind.name(), signal.symbol);
                SignalOutcome::Info(InfoResult {
                    success: true,
                    reason: Some("ignored".to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegStatus;
    use crate::storage::PriceActionDb;
    use crate::test_helpers::{entry_signal, MockBroker};

    struct Harness {
        plugins: PriceActionPlugins,
        broker: Arc<MockBroker>,
        db: Arc<PriceActionDb>,
    }

    fn harness(settings: PriceActionSettings) -> Harness {
        let broker = Arc::new(MockBroker::new());
        let db = Arc::new(PriceActionDb::open_in_memory().unwrap());
        let plugins = PriceActionPlugins::new(
            &settings,
            PriceActionDeps {
                executor: broker.clone(),
                account: broker.clone(),
                trend: broker.clone(),
                trades: db.clone(),
                signals: db.clone(),
                locks: Arc::new(SymbolLocks::new()),
                order_timeout: Duration::from_secs(5),
            },
        );
        Harness { plugins, broker, db }
    }

    fn pa_signal(direction: Direction, timeframe: &str) -> Signal {
        let mut s = entry_signal(EntryKind::MomentumBreakout, direction, timeframe);
        s.family = StrategyFamily::PriceAction;
        s
    }

    async fn entry(h: &Harness, signal: &Signal) -> EntryResult {
        match h.plugins.process_signal(signal).await {
            SignalOutcome::Entry(r) => r,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn rules_table_matches_variants() {
        let m1 = VariantRules::for_variant(PriceActionVariant::M1);
        assert_eq!(m1.shape, OrderShape::OrderBOnly);
        assert_eq!(m1.default_sl_pips, 15.0);
        let m5 = VariantRules::for_variant(PriceActionVariant::M5);
        assert_eq!(m5.shape, OrderShape::Dual);
        assert!(m5.breakeven_after_tp1);
        let h1 = VariantRules::for_variant(PriceActionVariant::H1);
        assert_eq!(h1.target, TakeProfit::Tp3);
        assert_eq!(h1.max_hold_minutes, 1440);
    }

    #[test]
    fn stop_distance_falls_back_to_default() {
        let rules = VariantRules::for_variant(PriceActionVariant::M15);
        let mut s = pa_signal(Direction::Buy, "15");
        assert!((rules.stop_distance_pips(&s) - 0.02).abs() < 1e-9);
        s.sl = None;
        assert_eq!(rules.stop_distance_pips(&s), 25.0);
    }

    #[tokio::test]
    async fn one_minute_places_single_b_leg() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Buy, "1")).await;
        assert!(result.success, "{:?}", result.reason);
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.orders[0].role, OrderRole::B);
        // base 0.40 x 0.5
        assert_eq!(result.lot, Some(0.2));

        let placed = h.broker.placed();
        assert_eq!(placed[0].tp, Some(1.102));
        assert_eq!(placed[0].strategy_id, "price_action_1m");

        let trade = h
            .db
            .get_trade(PriceActionVariant::M1, result.trade_id.unwrap())
            .unwrap()
            .unwrap();
        assert!(trade.order_a.is_none());
        assert_eq!(trade.max_hold_minutes, 60);
    }

    #[tokio::test]
    async fn low_confidence_is_rejected_before_orders() {
        let h = harness(PriceActionSettings::default());
        let mut s = pa_signal(Direction::Buy, "1");
        s.confidence = Some(79);
        let result = entry(&h, &s).await;
        assert_eq!(result.reason.as_deref(), Some("confidence_below_threshold"));
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn checks_short_circuit_in_order() {
        let h = harness(PriceActionSettings::default());
        let mut s = pa_signal(Direction::Buy, "5");
        s.adx = Some(10.0);
        s.confidence = Some(10);
        let result = entry(&h, &s).await;
        assert_eq!(result.reason.as_deref(), Some("adx_below_threshold"));
        assert!(h.broker.htf_calls().is_empty());
    }

    #[tokio::test]
    async fn wide_spread_is_rejected() {
        let h = harness(PriceActionSettings::default());
        h.broker.set_spread(2.5);
        let result = entry(&h, &pa_signal(Direction::Buy, "1")).await;
        assert_eq!(result.reason.as_deref(), Some("spread_too_wide"));
    }

    #[tokio::test]
    async fn five_minute_rejects_weak_strength() {
        let h = harness(PriceActionSettings::default());
        let mut s = pa_signal(Direction::Buy, "5");
        s.adx_strength = Some(TrendStrength::Weak);
        let result = entry(&h, &s).await;
        assert_eq!(result.reason.as_deref(), Some("weak_trend_strength"));
    }

    #[tokio::test]
    async fn five_minute_dual_uses_shared_stop() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Buy, "5")).await;
        assert!(result.success);
        assert_eq!(h.broker.htf_calls(), vec![vec![Timeframe::M15]]);

        let placed = h.broker.placed();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].sl, placed[1].sl);
        assert_eq!(placed[0].tp, Some(1.104));
        assert_eq!(placed[1].tp, Some(1.102));
        assert!((placed[0].lot + placed[1].lot - 0.4).abs() < 1e-9);

        let trade = h
            .db
            .get_trade(PriceActionVariant::M5, result.trade_id.unwrap())
            .unwrap()
            .unwrap();
        assert!(trade.breakeven_after_tp1);
        assert_eq!(trade.htf_aligned, Some(true));
    }

    #[tokio::test]
    async fn five_minute_needs_fifteen_minute_alignment() {
        let h = harness(PriceActionSettings::default());
        h.broker.set_htf_aligned(false);
        let result = entry(&h, &pa_signal(Direction::Buy, "5")).await;
        assert_eq!(result.reason.as_deref(), Some("timeframe_misalignment"));
    }

    #[tokio::test]
    async fn fifteen_minute_respects_market_state_then_pulse() {
        let h = harness(PriceActionSettings::default());
        h.broker.set_market("EURUSD", MarketState::Sideways);
        let result = entry(&h, &pa_signal(Direction::Buy, "15")).await;
        assert_eq!(result.reason.as_deref(), Some("market_state_conflict"));

        h.broker.set_market("EURUSD", MarketState::TrendingBullish);
        h.broker.set_pulse(false);
        let result = entry(&h, &pa_signal(Direction::Buy, "15")).await;
        assert_eq!(result.reason.as_deref(), Some("pulse_misalignment"));

        h.broker.set_pulse(true);
        let result = entry(&h, &pa_signal(Direction::Buy, "15")).await;
        assert!(result.success);
        assert_eq!(h.broker.placed()[0].tp, Some(1.104));
    }

    #[tokio::test]
    async fn one_hour_checks_higher_timeframes_and_targets_tp3() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Buy, "60")).await;
        assert!(result.success);
        assert_eq!(h.broker.htf_calls(), vec![vec![Timeframe::H4, Timeframe::D1]]);
        let placed = h.broker.placed();
        assert_eq!(placed[0].tp, Some(1.108));
        // base 0.40 x 0.6
        assert!((placed[0].lot - 0.24).abs() < 1e-9);
    }

    #[tokio::test]
    async fn counter_trend_sell_is_rejected_in_bullish_market() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Sell, "60")).await;
        assert_eq!(result.reason.as_deref(), Some("market_state_conflict"));
    }

    #[tokio::test]
    async fn unsupported_timeframe_and_disabled_variant() {
        let mut settings = PriceActionSettings::default();
        if let Some(v) = settings.variants.get_mut(&PriceActionVariant::M1) {
            v.enabled = false;
        }
        let h = harness(settings);

        let result = entry(&h, &pa_signal(Direction::Buy, "240")).await;
        assert_eq!(result.reason.as_deref(), Some("unsupported_timeframe"));

        let result = entry(&h, &pa_signal(Direction::Buy, "1")).await;
        assert_eq!(result.reason.as_deref(), Some("plugin_disabled"));
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn exit_closes_variant_trade() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Buy, "1")).await;
        let id = result.trade_id.unwrap();

        let mut exit = pa_signal(Direction::Buy, "1");
        exit.kind = SignalKind::Exit(ExitKind::BullishExit);
        exit.price = 1.1015;
        let outcome = h.plugins.process_signal(&exit).await;
        let SignalOutcome::Exit(r) = outcome else {
            panic!("expected exit outcome");
        };
        assert_eq!(r.positions_closed, 1);

        let trade = h.db.get_trade(PriceActionVariant::M1, id).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_price, Some(1.1015));
        assert!((trade.profit_pips - 15.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn refused_leg_keeps_the_trade_open() {
        let h = harness(PriceActionSettings::default());
        let result = entry(&h, &pa_signal(Direction::Buy, "5")).await;
        assert!(result.success);
        let id = result.trade_id.unwrap();
        let leg_b = result.orders[1].ticket.unwrap();
        h.broker.refuse_close(leg_b);

        let mut exit = pa_signal(Direction::Buy, "5");
        exit.kind = SignalKind::Exit(ExitKind::BullishExit);
        exit.price = 1.1015;
        let SignalOutcome::Exit(r) = h.plugins.process_signal(&exit).await else {
            panic!("expected exit outcome");
        };
        assert_eq!(r.positions_closed, 1);

        let trade = h.db.get_trade(PriceActionVariant::M5, id).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Partial);
        assert_eq!(trade.order_a.as_ref().unwrap().status, LegStatus::Closed);
        assert_eq!(trade.order_b.as_ref().unwrap().status, LegStatus::Open);
        assert!(trade.exit_time.is_none());
        let open = h.db.open_trades(PriceActionVariant::M5, "EURUSD").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);

        h.broker.allow_close(leg_b);
        let SignalOutcome::Exit(r) = h.plugins.process_signal(&exit).await else {
            panic!("expected exit outcome");
        };
        assert_eq!(r.positions_closed, 1);
        let trade = h.db.get_trade(PriceActionVariant::M5, id).unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.order_b.unwrap().status, LegStatus::Closed);
        assert!(h.db.open_trades(PriceActionVariant::M5, "EURUSD").unwrap().is_empty());
        assert_eq!(h.broker.closed().len(), 2);
    }

    #[tokio::test]
    async fn exit_on_unmapped_timeframe_sweeps_all_variants() {
        let h = harness(PriceActionSettings::default());
        entry(&h, &pa_signal(Direction::Buy, "1")).await;
        entry(&h, &pa_signal(Direction::Buy, "15")).await;

        let mut exit = pa_signal(Direction::Buy, "240");
        exit.kind = SignalKind::Exit(ExitKind::BullishExit);
        let outcome = h.plugins.process_signal(&exit).await;
        let SignalOutcome::Exit(r) = outcome else {
            panic!("expected exit outcome");
        };
        assert_eq!(r.positions_closed, 2);
        assert!(r.reason.is_none());
    }

    #[tokio::test]
    async fn reload_disables_variant() {
        let h = harness(PriceActionSettings::default());
        let mut next = PriceActionSettings::default();
        if let Some(v) = next.variants.get_mut(&PriceActionVariant::M15) {
            v.enabled = false;
        }
        h.plugins.apply_config(&next);
        let result = entry(&h, &pa_signal(Direction::Buy, "15")).await;
        assert_eq!(result.reason.as_deref(), Some("plugin_disabled"));
        assert!(h.plugins.get(PriceActionVariant::M1).unwrap().settings().enabled);
    }
}
