use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BotError, Result};
use crate::models::{Direction, Timeframe, TrendStrength};

const DEFAULT_TIMEFRAME: &str = "15";

/// Alert exactly as it arrives from the charting platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAlert {
    #[serde(rename = "type", alias = "signal_type")]
    pub signal_type: String,
    pub symbol: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, alias = "tf")]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default, alias = "sl_price")]
    pub sl: Option<f64>,
    #[serde(default, alias = "tp1_price")]
    pub tp1: Option<f64>,
    #[serde(default, alias = "tp2_price")]
    pub tp2: Option<f64>,
    #[serde(default, alias = "tp3_price")]
    pub tp3: Option<f64>,
    #[serde(default)]
    pub adx: Option<f64>,
    #[serde(default)]
    pub adx_strength: Option<String>,
    #[serde(default, alias = "conf_score")]
    pub confidence: Option<u32>,
    #[serde(default)]
    pub consensus_score: Option<i32>,
    #[serde(default, alias = "mtf_trends")]
    pub mtf: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub fresh_entry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    InstitutionalLaunchpad,
    LiquidityTrap,
    MomentumBreakout,
    MitigationTest,
    GoldenPocketFlip,
    ScreenerFullBullish,
    ScreenerFullBearish,
    SidewaysBreakout,
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::InstitutionalLaunchpad => "Institutional_Launchpad",
            EntryKind::LiquidityTrap => "Liquidity_Trap",
            EntryKind::MomentumBreakout => "Momentum_Breakout",
            EntryKind::MitigationTest => "Mitigation_Test",
            EntryKind::GoldenPocketFlip => "Golden_Pocket_Flip",
            EntryKind::ScreenerFullBullish => "Screener_Full_Bullish",
            EntryKind::ScreenerFullBearish => "Screener_Full_Bearish",
            EntryKind::SidewaysBreakout => "Sideways_Breakout",
        }
    }

    /// Price-action patterns that confirm themselves; trend alignment is not checked.
    pub fn is_aggressive(&self) -> bool {
        matches!(
            self,
            EntryKind::LiquidityTrap
                | EntryKind::GoldenPocketFlip
                | EntryKind::ScreenerFullBullish
                | EntryKind::ScreenerFullBearish
        )
    }

    fn implied_direction(&self) -> Option<Direction> {
        match self {
            EntryKind::ScreenerFullBullish => Some(Direction::Buy),
            EntryKind::ScreenerFullBearish => Some(Direction::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitKind {
    BullishExit,
    BearishExit,
    /// Close the side opposite to the carried direction, then re-enter.
    Reversal(Direction),
}

impl ExitKind {
    /// Side of the book this exit closes.
    pub fn closes(&self) -> Direction {
        match self {
            ExitKind::BullishExit => Direction::Buy,
            ExitKind::BearishExit => Direction::Sell,
            ExitKind::Reversal(new_direction) => new_direction.opposite(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitKind::BullishExit => "Bullish_Exit",
            ExitKind::BearishExit => "Bearish_Exit",
            ExitKind::Reversal(_) => "Reversal_Exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoKind {
    VolatilitySqueeze,
    TrendPulse,
}

impl InfoKind {
    pub fn name(&self) -> &'static str {
        match self {
            InfoKind::VolatilitySqueeze => "Volatility_Squeeze",
            InfoKind::TrendPulse => "Trend_Pulse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Entry(EntryKind, Direction),
    Exit(ExitKind),
    Info(InfoKind),
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Entry(kind, _) => kind.name(),
            SignalKind::Exit(kind) => kind.name(),
            SignalKind::Info(kind) => kind.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    Combined,
    PriceAction,
}

impl fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyFamily::Combined => write!(f, "combined"),
            StrategyFamily::PriceAction => write!(f, "price_action"),
        }
    }
}

impl StrategyFamily {
    pub fn from_str_loose(s: &str) -> StrategyFamily {
        match s.trim().to_ascii_lowercase().as_str() {
            "price_action" | "priceaction" | "pa" | "v6" => StrategyFamily::PriceAction,
            _ => StrategyFamily::Combined,
        }
    }
}

/// A decoded alert. Immutable once built; consumed by exactly one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// Type name as sent, e.g. `Liquidity_Trap_Reversal` or `Golden_Pocket_Flip_4H`.
    pub wire_type: String,
    pub symbol: String,
    /// Raw timeframe string as sent ("5", "15M", "1H").
    pub timeframe: String,
    pub price: f64,
    pub sl: Option<f64>,
    pub tp1: Option<f64>,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub adx: Option<f64>,
    pub adx_strength: Option<TrendStrength>,
    pub confidence: Option<u32>,
    pub consensus_score: Option<i32>,
    pub mtf: Option<String>,
    pub family: StrategyFamily,
    pub fresh_entry: bool,
    pub received_at: DateTime<Utc>,
}

impl Signal {
    pub fn from_json(text: &str) -> Result<Signal> {
        let raw: RawAlert = serde_json::from_str(text)?;
        Signal::from_alert(raw)
    }

    pub fn from_alert(raw: RawAlert) -> Result<Signal> {
        let wire_type = raw.signal_type.trim().to_string();
        let direction = raw.direction.as_deref().and_then(Direction::from_str_loose);
        let mut default_tf = DEFAULT_TIMEFRAME;

        let kind = match wire_type.as_str() {
            "Bullish_Exit" => SignalKind::Exit(ExitKind::BullishExit),
            "Bearish_Exit" => SignalKind::Exit(ExitKind::BearishExit),
            "Reversal_Exit" => {
                let dir = direction.ok_or_else(|| missing_direction(&wire_type))?;
                SignalKind::Exit(ExitKind::Reversal(dir))
            }
            "Volatility_Squeeze" | "Squeeze_Alert" => SignalKind::Info(InfoKind::VolatilitySqueeze),
            "Trend_Pulse" => SignalKind::Info(InfoKind::TrendPulse),
            other => {
                let entry = match other {
                    "Institutional_Launchpad" => EntryKind::InstitutionalLaunchpad,
                    "Liquidity_Trap" | "Liquidity_Trap_Reversal" => EntryKind::LiquidityTrap,
                    "Momentum_Breakout" => EntryKind::MomentumBreakout,
                    "Mitigation_Test" | "Mitigation_Test_Entry" => EntryKind::MitigationTest,
                    "Golden_Pocket_Flip" => EntryKind::GoldenPocketFlip,
                    "Golden_Pocket_Flip_1H" => {
                        default_tf = "60";
                        EntryKind::GoldenPocketFlip
                    }
                    "Golden_Pocket_Flip_4H" => {
                        default_tf = "240";
                        EntryKind::GoldenPocketFlip
                    }
                    "Screener_Full_Bullish" => EntryKind::ScreenerFullBullish,
                    "Screener_Full_Bearish" => EntryKind::ScreenerFullBearish,
                    "Sideways_Breakout" => EntryKind::SidewaysBreakout,
                    _ => return Err(BotError::UnknownSignal(wire_type)),
                };
                let dir = direction
                    .or_else(|| entry.implied_direction())
                    .ok_or_else(|| missing_direction(&wire_type))?;
                SignalKind::Entry(entry, dir)
            }
        };

        if raw.symbol.trim().is_empty() {
            return Err(BotError::Format(format!("{}: empty symbol", wire_type)));
        }

        Ok(Signal {
            kind,
            wire_type,
            symbol: raw.symbol.trim().to_ascii_uppercase(),
            timeframe: raw
                .timeframe
                .map(|tf| tf.trim().to_string())
                .filter(|tf| !tf.is_empty())
                .unwrap_or_else(|| default_tf.to_string()),
            price: raw.price,
            sl: raw.sl,
            tp1: raw.tp1,
            tp2: raw.tp2,
            tp3: raw.tp3,
            adx: raw.adx,
            adx_strength: raw.adx_strength.as_deref().and_then(TrendStrength::from_str_loose),
            confidence: raw.confidence,
            consensus_score: raw.consensus_score,
            mtf: raw.mtf.filter(|s| !s.trim().is_empty()),
            family: raw
                .strategy
                .as_deref()
                .map(StrategyFamily::from_str_loose)
                .unwrap_or(StrategyFamily::Combined),
            fresh_entry: raw.fresh_entry,
            received_at: Utc::now(),
        })
    }

    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            SignalKind::Entry(_, dir) => Some(dir),
            SignalKind::Exit(ExitKind::Reversal(dir)) => Some(dir),
            SignalKind::Exit(_) | SignalKind::Info(_) => None,
        }
    }

    pub fn parsed_timeframe(&self) -> Option<Timeframe> {
        Timeframe::from_str_loose(&self.timeframe)
    }

    /// Extended target for trend-riding legs.
    pub fn extended_target(&self) -> Option<f64> {
        self.tp2.or(self.tp1)
    }

    /// Same signal re-expressed as an entry in `direction` (reversal re-entry).
    pub fn as_entry(&self, kind: EntryKind, direction: Direction) -> Signal {
        Signal {
            kind: SignalKind::Entry(kind, direction),
            fresh_entry: true,
            ..self.clone()
        }
    }
}

fn missing_direction(wire_type: &str) -> BotError {
    BotError::Format(format!("{}: missing or invalid direction", wire_type))
}
