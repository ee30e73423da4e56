use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// Pillar value that agrees with this direction.
    pub fn pillar_sign(self) -> i8 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Direction> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" | "BULL" | "BULLISH" => Some(Direction::Buy),
            "SELL" | "SHORT" | "BEAR" | "BEARISH" => Some(Direction::Sell),
            _ => None,
        }
    }
}

/// Lifecycle of a persisted trade row. Rows are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Partial,
    Closed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Partial => "PARTIAL",
            TradeStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> TradeStatus {
        match s {
            "PARTIAL" => TradeStatus::Partial,
            "CLOSED" => TradeStatus::Closed,
            _ => TradeStatus::Open,
        }
    }

    pub fn is_active(self) -> bool {
        self != TradeStatus::Closed
    }
}

/// Status of one leg of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegStatus {
    Open,
    Closed,
    Failed,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Open => "OPEN",
            LegStatus::Closed => "CLOSED",
            LegStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> LegStatus {
        match s {
            "CLOSED" => LegStatus::Closed,
            "FAILED" => LegStatus::Failed,
            _ => LegStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderRole {
    /// Trend-riding leg: strategy stop, extended target.
    #[serde(rename = "A")]
    A,
    /// Profit-taking leg: fixed-dollar stop, nearer target.
    #[serde(rename = "B")]
    B,
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRole::A => write!(f, "A"),
            OrderRole::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderShape {
    OrderAOnly,
    OrderBOnly,
    Dual,
}

impl fmt::Display for OrderShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderShape::OrderAOnly => write!(f, "A_ONLY"),
            OrderShape::OrderBOnly => write!(f, "B_ONLY"),
            OrderShape::Dual => write!(f, "DUAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    TrendingBullish,
    TrendingBearish,
    Sideways,
    Unknown,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketState::TrendingBullish => write!(f, "TRENDING_BULLISH"),
            MarketState::TrendingBearish => write!(f, "TRENDING_BEARISH"),
            MarketState::Sideways => write!(f, "SIDEWAYS"),
            MarketState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl MarketState {
    pub fn parse(s: &str) -> MarketState {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRENDING_BULLISH" | "BULLISH" => MarketState::TrendingBullish,
            "TRENDING_BEARISH" | "BEARISH" => MarketState::TrendingBearish,
            "SIDEWAYS" | "RANGING" => MarketState::Sideways,
            _ => MarketState::Unknown,
        }
    }

    /// Sideways markets and counter-trend entries are rejected.
    pub fn permits(self, direction: Direction) -> bool {
        match (self, direction) {
            (MarketState::Sideways, _) => false,
            (MarketState::TrendingBearish, Direction::Buy) => false,
            (MarketState::TrendingBullish, Direction::Sell) => false,
            _ => true,
        }
    }
}

/// Categorical ADX reading sent alongside the numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendStrength {
    Weak,
    Moderate,
    Strong,
}

impl TrendStrength {
    pub fn from_str_loose(s: &str) -> Option<TrendStrength> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WEAK" => Some(TrendStrength::Weak),
            "MODERATE" | "MEDIUM" => Some(TrendStrength::Moderate),
            "STRONG" => Some(TrendStrength::Strong),
            _ => None,
        }
    }
}
