use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::symbols::round2;

pub const DEFAULT_MIN_LOT: f64 = 0.01;
pub const DEFAULT_MAX_LOT: f64 = 10.0;
pub const DEFAULT_SPLIT_RATIO: f64 = 0.5;
pub const MAX_CONSENSUS_SCORE: i32 = 9;
const MIN_CONSENSUS_MULT: f64 = 0.2;
const CONSENSUS_MULT_RANGE: f64 = 0.8;

/// Balance range `[min_balance, max_balance)` mapped to a fixed base lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceBracket {
    pub name: String,
    pub min_balance: f64,
    /// `None` means unbounded.
    pub max_balance: Option<f64>,
    pub base_lot: f64,
}

impl BalanceBracket {
    fn new(name: &str, min_balance: f64, max_balance: Option<f64>, base_lot: f64) -> Self {
        Self {
            name: name.to_string(),
            min_balance,
            max_balance,
            base_lot,
        }
    }

    pub fn contains(&self, balance: f64) -> bool {
        balance >= self.min_balance && self.max_balance.map_or(true, |max| balance < max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotBounds {
    pub min_lot: f64,
    pub max_lot: f64,
}

impl Default for LotBounds {
    fn default() -> Self {
        Self {
            min_lot: DEFAULT_MIN_LOT,
            max_lot: DEFAULT_MAX_LOT,
        }
    }
}

impl LotBounds {
    /// Round to two decimals, then clamp into bounds.
    pub fn apply(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return self.min_lot;
        }
        round2(raw).max(self.min_lot).min(self.max_lot)
    }

    pub fn validate(&self, lot: f64) -> bool {
        lot.is_finite() && lot >= self.min_lot && lot <= self.max_lot
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    pub brackets: Vec<BalanceBracket>,
    pub bounds: LotBounds,
    pub split_ratio: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            brackets: vec![
                BalanceBracket::new("micro", 0.0, Some(1_000.0), 0.01),
                BalanceBracket::new("mini", 1_000.0, Some(5_000.0), 0.05),
                BalanceBracket::new("standard", 5_000.0, Some(25_000.0), 0.10),
                BalanceBracket::new("premium", 25_000.0, Some(100_000.0), 0.25),
                BalanceBracket::new("elite", 100_000.0, None, 0.50),
            ],
            bounds: LotBounds::default(),
            split_ratio: DEFAULT_SPLIT_RATIO,
        }
    }
}

impl SizingConfig {
    /// Bracket containing `balance`; balances below the first bracket use the first.
    pub fn bracket_for(&self, balance: f64) -> Option<&BalanceBracket> {
        self.brackets
            .iter()
            .find(|b| b.contains(balance))
            .or_else(|| self.brackets.first())
    }

    pub fn base_lot(&self, balance: f64) -> f64 {
        self.bracket_for(balance)
            .map(|b| b.base_lot)
            .unwrap_or(self.bounds.min_lot)
    }
}

/// `0.2 + (clamp(score, 0, 9) / 9) * 0.8`. Out-of-range scores are clamped.
pub fn consensus_multiplier(score: i32) -> f64 {
    let s = score.clamp(0, MAX_CONSENSUS_SCORE) as f64;
    MIN_CONSENSUS_MULT + (s / MAX_CONSENSUS_SCORE as f64) * CONSENSUS_MULT_RANGE
}

/// Divide a sized position into two legs, each rounded and floored at `min_lot`.
pub fn split_lot(lot: f64, ratio: f64, min_lot: f64) -> (f64, f64) {
    let ratio = ratio.clamp(0.0, 1.0);
    let a = round2(lot * ratio).max(min_lot);
    let b = round2(lot * (1.0 - ratio)).max(min_lot);
    (a, b)
}

/// Symbol-specific lot scaling applied before the final clamp.
pub trait LotAdjustment: Send + Sync {
    fn adjust(&self, symbol: &str, lot: f64) -> f64;
}

pub struct NoAdjustment;

impl LotAdjustment for NoAdjustment {
    fn adjust(&self, _symbol: &str, lot: f64) -> f64 {
        lot
    }
}

/// Scales gold/metal lots by a fixed factor.
pub struct MetalScaling {
    pub factor: f64,
}

impl Default for MetalScaling {
    fn default() -> Self {
        Self { factor: 0.1 }
    }
}

impl LotAdjustment for MetalScaling {
    fn adjust(&self, symbol: &str, lot: f64) -> f64 {
        let s = symbol.to_ascii_uppercase();
        if s.contains("XAU") || s.contains("GOLD") {
            lot * self.factor
        } else {
            lot
        }
    }
}

#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    pub symbol: &'a str,
    pub balance: f64,
    /// 0-9 consensus score (consensus sizing).
    pub consensus_score: i32,
    /// Coefficient carried by the routed logic tier.
    pub tier_multiplier: f64,
    /// Lot computed by the brokerage from balance and stop distance (risk sizing).
    pub broker_base_lot: Option<f64>,
}

/// A named way of turning a request into a bounded lot.
pub trait LotSizing: Send + Sync {
    fn name(&self) -> &'static str;
    fn size(&self, input: &SizingInput<'_>) -> f64;
}

/// Base lot from balance bracket x consensus multiplier x tier multiplier.
pub struct ConsensusSizing {
    config: SizingConfig,
    adjustment: Arc<dyn LotAdjustment>,
}

impl ConsensusSizing {
    pub fn new(config: SizingConfig) -> Self {
        Self {
            config,
            adjustment: Arc::new(NoAdjustment),
        }
    }

    pub fn with_adjustment(mut self, adjustment: Arc<dyn LotAdjustment>) -> Self {
        self.adjustment = adjustment;
        self
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn split(&self, lot: f64) -> (f64, f64) {
        split_lot(lot, self.config.split_ratio, self.config.bounds.min_lot)
    }
}

impl LotSizing for ConsensusSizing {
    fn name(&self) -> &'static str {
        "consensus"
    }

    fn size(&self, input: &SizingInput<'_>) -> f64 {
        let raw = self.config.base_lot(input.balance)
            * consensus_multiplier(input.consensus_score)
            * input.tier_multiplier;
        let adjusted = self.adjustment.adjust(input.symbol, raw);
        self.config.bounds.apply(adjusted)
    }
}

/// Brokerage-computed base lot x a flat per-strategy risk multiplier.
pub struct RiskMultiplierSizing {
    risk_multiplier: f64,
    bounds: LotBounds,
    adjustment: Arc<dyn LotAdjustment>,
}

impl RiskMultiplierSizing {
    pub fn new(risk_multiplier: f64, bounds: LotBounds) -> Self {
        Self {
            risk_multiplier,
            bounds,
            adjustment: Arc::new(NoAdjustment),
        }
    }

    pub fn with_adjustment(mut self, adjustment: Arc<dyn LotAdjustment>) -> Self {
        self.adjustment = adjustment;
        self
    }

    pub fn risk_multiplier(&self) -> f64 {
        self.risk_multiplier
    }
}

impl LotSizing for RiskMultiplierSizing {
    fn name(&self) -> &'static str {
        "risk_multiplier"
    }

    fn size(&self, input: &SizingInput<'_>) -> f64 {
        let raw = input.broker_base_lot.unwrap_or(0.0) * self.risk_multiplier;
        let adjusted = self.adjustment.adjust(input.symbol, raw);
        self.bounds.apply(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(balance: f64, score: i32, tier_multiplier: f64) -> SizingInput<'static> {
        SizingInput {
            symbol: "EURUSD",
            balance,
            consensus_score: score,
            tier_multiplier,
            broker_base_lot: None,
        }
    }

    #[test]
    fn brackets_are_min_inclusive() {
        let cfg = SizingConfig::default();
        assert_eq!(cfg.bracket_for(999.99).unwrap().name, "micro");
        assert_eq!(cfg.bracket_for(1_000.0).unwrap().name, "mini");
        assert_eq!(cfg.bracket_for(15_000.0).unwrap().name, "standard");
        assert_eq!(cfg.bracket_for(100_000.0).unwrap().name, "elite");
        assert_eq!(cfg.bracket_for(-5.0).unwrap().name, "micro");
        assert!((cfg.base_lot(30_000.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn consensus_multiplier_endpoints() {
        assert!((consensus_multiplier(0) - 0.2).abs() < 1e-9);
        assert!((consensus_multiplier(9) - 1.0).abs() < 1e-9);
        assert!((consensus_multiplier(-3) - 0.2).abs() < 1e-9);
        assert!((consensus_multiplier(42) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn consensus_sizing_formula() {
        let sizer = ConsensusSizing::new(SizingConfig::default());
        // 0.10 * (0.2 + 7/9*0.8) * 1.25 = 0.1027 -> 0.10
        let lot = sizer.size(&input(15_000.0, 7, 1.25));
        assert!((lot - 0.10).abs() < 1e-9);
        // elite, full consensus, logic1: 0.5 * 1.0 * 1.25 = 0.625 -> 0.63
        let lot = sizer.size(&input(250_000.0, 9, 1.25));
        assert!((lot - 0.63).abs() < 1e-9);
    }

    #[test]
    fn clamps_to_min_and_max() {
        let sizer = ConsensusSizing::new(SizingConfig::default());
        let lot = sizer.size(&input(50.0, 0, 0.625));
        assert!((lot - 0.01).abs() < 1e-9);

        let mut cfg = SizingConfig::default();
        cfg.bounds.max_lot = 0.2;
        let sizer = ConsensusSizing::new(cfg);
        let lot = sizer.size(&input(1_000_000.0, 9, 1.25));
        assert!((lot - 0.2).abs() < 1e-9);
    }

    #[test]
    fn metal_hook_is_opt_in() {
        let plain = ConsensusSizing::new(SizingConfig::default());
        let scaled = ConsensusSizing::new(SizingConfig::default())
            .with_adjustment(Arc::new(MetalScaling::default()));
        let mut req = input(250_000.0, 9, 1.0);
        req.symbol = "XAUUSD";
        assert!((plain.size(&req) - 0.5).abs() < 1e-9);
        assert!((scaled.size(&req) - 0.05).abs() < 1e-9);
        req.symbol = "EURUSD";
        assert!((scaled.size(&req) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn split_floors_each_leg() {
        let (a, b) = split_lot(0.10, 0.5, 0.01);
        assert!((a - 0.05).abs() < 1e-9 && (b - 0.05).abs() < 1e-9);
        let (a, b) = split_lot(0.01, 0.5, 0.01);
        assert!((a - 0.01).abs() < 1e-9 && (b - 0.01).abs() < 1e-9);
        let (a, b) = split_lot(1.0, 0.7, 0.01);
        assert!((a - 0.7).abs() < 1e-9 && (b - 0.3).abs() < 1e-9);
    }

    #[test]
    fn risk_multiplier_sizing() {
        let sizer = RiskMultiplierSizing::new(0.5, LotBounds::default());
        let req = SizingInput {
            symbol: "EURUSD",
            balance: 10_000.0,
            consensus_score: 0,
            tier_multiplier: 1.0,
            broker_base_lot: Some(0.40),
        };
        assert!((sizer.size(&req) - 0.20).abs() < 1e-9);
        assert_eq!(sizer.name(), "risk_multiplier");

        let missing = SizingInput { broker_base_lot: None, ..req };
        assert!((sizer.size(&missing) - 0.01).abs() < 1e-9);
    }

    #[test]
    fn bounds_validate() {
        let b = LotBounds::default();
        assert!(b.validate(0.01));
        assert!(b.validate(10.0));
        assert!(!b.validate(10.01));
        assert!(!b.validate(f64::NAN));
        assert!((b.apply(f64::INFINITY) - 0.01).abs() < 1e-9);
    }
}
