use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogicTier {
    #[serde(rename = "LOGIC1")]
    Logic1,
    #[serde(rename = "LOGIC2")]
    Logic2,
    #[serde(rename = "LOGIC3")]
    Logic3,
}

impl fmt::Display for LogicTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl LogicTier {
    pub const ALL: [LogicTier; 3] = [LogicTier::Logic1, LogicTier::Logic2, LogicTier::Logic3];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicTier::Logic1 => "LOGIC1",
            LogicTier::Logic2 => "LOGIC2",
            LogicTier::Logic3 => "LOGIC3",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LogicTier::Logic1 => "Scalping",
            LogicTier::Logic2 => "Intraday",
            LogicTier::Logic3 => "Swing",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<LogicTier> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOGIC1" | "1" | "SCALPING" => Some(LogicTier::Logic1),
            "LOGIC2" | "2" | "INTRADAY" => Some(LogicTier::Logic2),
            "LOGIC3" | "3" | "SWING" => Some(LogicTier::Logic3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierParams {
    pub lot_multiplier: f64,
    pub sl_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub logic1: TierParams,
    pub logic2: TierParams,
    pub logic3: TierParams,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            logic1: TierParams { lot_multiplier: 1.25, sl_multiplier: 1.0 },
            logic2: TierParams { lot_multiplier: 1.0, sl_multiplier: 1.5 },
            logic3: TierParams { lot_multiplier: 0.625, sl_multiplier: 2.0 },
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: LogicTier) -> TierParams {
        match tier {
            LogicTier::Logic1 => self.logic1,
            LogicTier::Logic2 => self.logic2,
            LogicTier::Logic3 => self.logic3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Signal type (wire name or `<type>_<TF label>`) to tier. Checked first.
    pub overrides: BTreeMap<String, LogicTier>,
    /// Raw timeframe string to tier.
    pub timeframes: BTreeMap<String, LogicTier>,
    pub default_tier: LogicTier,
    pub tiers: TierTable,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let overrides = [
            "Screener_Full_Bullish",
            "Screener_Full_Bearish",
            "Golden_Pocket_Flip_1H",
            "Golden_Pocket_Flip_4H",
        ]
        .iter()
        .map(|k| (k.to_string(), LogicTier::Logic3))
        .collect();

        let mut timeframes = BTreeMap::new();
        for tf in ["1", "5", "1M", "5M"] {
            timeframes.insert(tf.to_string(), LogicTier::Logic1);
        }
        for tf in ["15", "15M"] {
            timeframes.insert(tf.to_string(), LogicTier::Logic2);
        }
        for tf in ["60", "1H", "240", "4H", "D1", "1440"] {
            timeframes.insert(tf.to_string(), LogicTier::Logic3);
        }

        Self {
            overrides,
            timeframes,
            default_tier: LogicTier::Logic2,
            tiers: TierTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteReason {
    Override(String),
    Timeframe(String),
    Default,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteReason::Override(key) => write!(f, "override:{}", key),
            RouteReason::Timeframe(tf) => write!(f, "timeframe:{}", tf),
            RouteReason::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub tier: LogicTier,
    pub name: &'static str,
    pub params: TierParams,
    pub reason: RouteReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStatistics {
    pub override_count: usize,
    pub timeframe_routes: usize,
    pub default_tier: LogicTier,
    pub routed: BTreeMap<LogicTier, u64>,
    pub by_override: u64,
    pub by_timeframe: u64,
    pub by_default: u64,
}

#[derive(Debug, Default)]
struct RouteCounters {
    tiers: [AtomicU64; 3],
    overrides: AtomicU64,
    timeframes: AtomicU64,
    defaults: AtomicU64,
}

impl RouteCounters {
    fn record(&self, tier: LogicTier, reason: &RouteReason) {
        let idx = match tier {
            LogicTier::Logic1 => 0,
            LogicTier::Logic2 => 1,
            LogicTier::Logic3 => 2,
        };
        self.tiers[idx].fetch_add(1, Ordering::Relaxed);
        let kind = match reason {
            RouteReason::Override(_) => &self.overrides,
            RouteReason::Timeframe(_) => &self.timeframes,
            RouteReason::Default => &self.defaults,
        };
        kind.fetch_add(1, Ordering::Relaxed);
    }
}

/// Two-tier router: signal-type overrides, then the timeframe table, then the default.
/// Clones share one set of decision counters.
#[derive(Debug, Clone)]
pub struct SignalRouter {
    config: RoutingConfig,
    counters: Arc<RouteCounters>,
}

impl SignalRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            counters: Arc::new(RouteCounters::default()),
        }
    }

    /// New tables, same counters.
    pub fn reconfigured(&self, config: RoutingConfig) -> Self {
        Self {
            config,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn route(&self, signal: &Signal) -> LogicTier {
        self.route_info(signal).tier
    }

    /// Resolve a tier without touching the statistics.
    pub fn route_info(&self, signal: &Signal) -> RouteDecision {
        let (tier, reason) = self.resolve(signal);
        RouteDecision {
            tier,
            name: tier.display_name(),
            params: self.config.tiers.get(tier),
            reason,
        }
    }

    /// Count a decision the caller acted on.
    pub fn record(&self, decision: &RouteDecision) {
        self.counters.record(decision.tier, &decision.reason);
    }

    fn resolve(&self, signal: &Signal) -> (LogicTier, RouteReason) {
        for key in override_keys(signal) {
            if let Some(tier) = self.config.overrides.get(&key) {
                return (*tier, RouteReason::Override(key));
            }
        }

        let tf = signal.timeframe.trim();
        let by_tf = self
            .config
            .timeframes
            .get(tf)
            .or_else(|| self.config.timeframes.get(&tf.to_ascii_uppercase()));
        if let Some(tier) = by_tf {
            return (*tier, RouteReason::Timeframe(tf.to_string()));
        }

        (self.config.default_tier, RouteReason::Default)
    }

    pub fn timeframe_tier(&self, timeframe: &str) -> LogicTier {
        self.config
            .timeframes
            .get(timeframe)
            .copied()
            .unwrap_or(self.config.default_tier)
    }

    pub fn is_override(&self, signal: &Signal) -> bool {
        override_keys(signal)
            .iter()
            .any(|k| self.config.overrides.contains_key(k))
    }

    pub fn params(&self, tier: LogicTier) -> TierParams {
        self.config.tiers.get(tier)
    }

    pub fn statistics(&self) -> RouterStatistics {
        RouterStatistics {
            override_count: self.config.overrides.len(),
            timeframe_routes: self.config.timeframes.len(),
            default_tier: self.config.default_tier,
            routed: LogicTier::ALL
                .iter()
                .zip(&self.counters.tiers)
                .map(|(tier, n)| (*tier, n.load(Ordering::Relaxed)))
                .collect(),
            by_override: self.counters.overrides.load(Ordering::Relaxed),
            by_timeframe: self.counters.timeframes.load(Ordering::Relaxed),
            by_default: self.counters.defaults.load(Ordering::Relaxed),
        }
    }
}

/// Wire name first, then the canonical composite `<type>_<TF label>`.
fn override_keys(signal: &Signal) -> Vec<String> {
    let mut keys = vec![signal.wire_type.clone()];
    let canonical = match signal.kind {
        SignalKind::Entry(kind, _) => kind.name(),
        other => other.name(),
    };
    if canonical != signal.wire_type {
        keys.push(canonical.to_string());
    }
    if let Some(tf) = signal.parsed_timeframe() {
        keys.push(format!("{}_{}", canonical, tf.label()));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, EntryKind, Timeframe};
    use crate::test_helpers::entry_signal;

    fn router() -> SignalRouter {
        SignalRouter::new(RoutingConfig::default())
    }

    #[test]
    fn timeframe_table_picks_tier() {
        let r = router();
        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "5");
        assert_eq!(r.route(&sig), LogicTier::Logic1);
        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "15");
        assert_eq!(r.route(&sig), LogicTier::Logic2);
        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "240");
        assert_eq!(r.route(&sig), LogicTier::Logic3);
    }

    #[test]
    fn override_beats_timeframe() {
        let r = router();
        let sig = entry_signal(EntryKind::ScreenerFullBullish, Direction::Buy, "5");
        let info = r.route_info(&sig);
        assert_eq!(info.tier, LogicTier::Logic3);
        assert_eq!(info.reason, RouteReason::Override("Screener_Full_Bullish".into()));
        assert!(r.is_override(&sig));
    }

    #[test]
    fn composite_override_uses_timeframe_label() {
        let r = router();
        let sig = entry_signal(EntryKind::GoldenPocketFlip, Direction::Buy, "60");
        let info = r.route_info(&sig);
        assert_eq!(info.tier, LogicTier::Logic3);
        assert_eq!(info.reason, RouteReason::Override("Golden_Pocket_Flip_1H".into()));

        // Plain flip on 5m has no override and follows the table.
        let sig = entry_signal(EntryKind::GoldenPocketFlip, Direction::Buy, "5");
        assert_eq!(r.route(&sig), LogicTier::Logic1);
    }

    #[test]
    fn unknown_timeframe_uses_default() {
        let r = router();
        let sig = entry_signal(EntryKind::MomentumBreakout, Direction::Sell, "3");
        let info = r.route_info(&sig);
        assert_eq!(info.tier, LogicTier::Logic2);
        assert_eq!(info.reason, RouteReason::Default);
        assert_eq!(info.name, "Intraday");
    }

    #[test]
    fn tables_are_replaceable() {
        let mut cfg = RoutingConfig::default();
        cfg.timeframes.insert("5".into(), LogicTier::Logic3);
        cfg.overrides.insert("Momentum_Breakout".into(), LogicTier::Logic1);
        cfg.default_tier = LogicTier::Logic1;
        let r = SignalRouter::new(cfg);

        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "5");
        assert_eq!(r.route(&sig), LogicTier::Logic3);
        let sig = entry_signal(EntryKind::MomentumBreakout, Direction::Buy, "240");
        assert_eq!(r.route(&sig), LogicTier::Logic1);
        assert_eq!(r.timeframe_tier("nope"), LogicTier::Logic1);
    }

    #[test]
    fn statistics_count_decisions_across_reconfigure() {
        let r = router();
        for sig in [
            entry_signal(EntryKind::ScreenerFullBullish, Direction::Buy, "5"),
            entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "5"),
            entry_signal(EntryKind::MomentumBreakout, Direction::Buy, "3"),
        ] {
            r.record(&r.route_info(&sig));
        }

        let next = r.reconfigured(RoutingConfig::default());
        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "15");
        next.record(&next.route_info(&sig));

        let stats = next.statistics();
        assert_eq!(stats.by_override, 1);
        assert_eq!(stats.by_timeframe, 2);
        assert_eq!(stats.by_default, 1);
        assert_eq!(stats.routed[&LogicTier::Logic1], 1);
        assert_eq!(stats.routed[&LogicTier::Logic2], 2);
        assert_eq!(stats.routed[&LogicTier::Logic3], 1);
    }

    #[test]
    fn resolving_leaves_statistics_alone() {
        let r = router();
        let sig = entry_signal(EntryKind::InstitutionalLaunchpad, Direction::Buy, "5");
        assert_eq!(r.route(&sig), LogicTier::Logic1);
        let decision = r.route_info(&sig);
        let stats = r.statistics();
        assert_eq!(stats.by_timeframe, 0);
        assert!(stats.routed.values().all(|n| *n == 0));

        r.record(&decision);
        assert_eq!(r.statistics().by_timeframe, 1);
        assert_eq!(r.statistics().routed[&LogicTier::Logic1], 1);
    }

    #[test]
    fn default_tier_coefficients() {
        let t = TierTable::default();
        assert!((t.get(LogicTier::Logic1).lot_multiplier - 1.25).abs() < 1e-9);
        assert!((t.get(LogicTier::Logic3).lot_multiplier - 0.625).abs() < 1e-9);
        assert!((t.get(LogicTier::Logic2).sl_multiplier - 1.5).abs() < 1e-9);
    }

    #[test]
    fn table_defaults_match_timeframe_order() {
        let r = router();
        for tf in Timeframe::ALL {
            let expected = match tf {
                Timeframe::M1 | Timeframe::M5 => LogicTier::Logic1,
                Timeframe::M15 => LogicTier::Logic2,
                _ => LogicTier::Logic3,
            };
            assert_eq!(r.timeframe_tier(tf.label()), expected);
            let minutes = (tf.as_seconds() / 60).to_string();
            assert_eq!(r.timeframe_tier(&minutes), expected);
        }
    }
}
