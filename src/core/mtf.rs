use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{BotError, Result};
use crate::models::{Direction, Timeframe};

/// Number of comma-separated values in a trend string (1m,5m,15m,1h,4h,1d).
pub const TREND_VALUES: usize = 6;
/// Leading values dropped before alignment; 1m/5m are too noisy.
const DISCARDED: usize = 2;
pub const PILLAR_TIMEFRAMES: [Timeframe; 4] =
    [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];
pub const DEFAULT_MIN_ALIGNMENT: usize = 3;

/// Four retained trend pillars, each -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PillarSet {
    values: [i8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendSummary {
    Bullish,
    Bearish,
    Mixed,
}

impl fmt::Display for TrendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendSummary::Bullish => write!(f, "BULLISH"),
            TrendSummary::Bearish => write!(f, "BEARISH"),
            TrendSummary::Mixed => write!(f, "MIXED"),
        }
    }
}

impl PillarSet {
    pub fn new(values: [i8; 4]) -> Result<Self> {
        if let Some(bad) = values.iter().find(|v| !(-1..=1).contains(*v)) {
            return Err(BotError::Format(format!("pillar value {} outside -1..=1", bad)));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> [i8; 4] {
        self.values
    }

    pub fn get(&self, tf: Timeframe) -> Option<i8> {
        PILLAR_TIMEFRAMES
            .iter()
            .position(|p| *p == tf)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timeframe, i8)> + '_ {
        PILLAR_TIMEFRAMES.iter().copied().zip(self.values.iter().copied())
    }

    pub fn alignment_count(&self, direction: Direction) -> usize {
        let sign = direction.pillar_sign();
        self.values.iter().filter(|v| **v == sign).count()
    }

    pub fn is_aligned(&self, direction: Direction, min_count: usize) -> bool {
        self.alignment_count(direction) >= min_count
    }

    pub fn summary(&self) -> TrendSummary {
        if self.alignment_count(Direction::Buy) >= DEFAULT_MIN_ALIGNMENT {
            TrendSummary::Bullish
        } else if self.alignment_count(Direction::Sell) >= DEFAULT_MIN_ALIGNMENT {
            TrendSummary::Bearish
        } else {
            TrendSummary::Mixed
        }
    }
}

/// Parse a six-value trend string and keep the 15m/1h/4h/1d pillars.
pub fn extract_pillars(trend_string: &str) -> Result<PillarSet> {
    let trimmed = trend_string.trim();
    if trimmed.is_empty() {
        return Err(BotError::Format("empty trend string".into()));
    }

    let parsed: Vec<i8> = trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<i8>()
                .map_err(|_| BotError::Format(format!("non-integer trend value '{}'", part.trim())))
        })
        .collect::<Result<_>>()?;

    if parsed.len() != TREND_VALUES {
        return Err(BotError::Format(format!(
            "expected {} trend values, got {}",
            TREND_VALUES,
            parsed.len()
        )));
    }

    let mut values = [0i8; 4];
    values.copy_from_slice(&parsed[DISCARDED..]);
    PillarSet::new(values)
}

pub fn alignment_count(pillars: &PillarSet, direction: Direction) -> usize {
    pillars.alignment_count(direction)
}

pub fn is_aligned(pillars: &PillarSet, direction: Direction, min_count: usize) -> bool {
    pillars.is_aligned(direction, min_count)
}

/// Last known pillars per symbol. Entries never expire; callers clear explicitly.
pub trait TrendCache: Send + Sync {
    fn get(&self, symbol: &str) -> Option<PillarSet>;
    fn put(&self, symbol: &str, pillars: PillarSet);
    /// Clear one symbol, or everything when `symbol` is `None`.
    fn clear(&self, symbol: Option<&str>);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryTrendCache {
    entries: RwLock<HashMap<String, PillarSet>>,
}

impl InMemoryTrendCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrendCache for InMemoryTrendCache {
    fn get(&self, symbol: &str) -> Option<PillarSet> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(symbol).copied())
    }

    fn put(&self, symbol: &str, pillars: PillarSet) {
        if let Ok(mut map) = self.entries.write() {
            map.insert(symbol.to_string(), pillars);
        }
    }

    fn clear(&self, symbol: Option<&str>) {
        if let Ok(mut map) = self.entries.write() {
            match symbol {
                Some(s) => {
                    map.remove(s);
                }
                None => map.clear(),
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentCheck {
    Aligned { count: usize, source: PillarSource },
    Misaligned { count: usize, source: PillarSource },
    /// No trend string and nothing cached: entry allowed.
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PillarSource {
    Signal,
    Cache,
}

impl AlignmentCheck {
    pub fn passes(&self) -> bool {
        !matches!(self, AlignmentCheck::Misaligned { .. })
    }
}

/// Validate alignment from the signal's trend string, falling back to the cache.
/// A freshly parsed string refreshes the cache for the symbol.
pub fn check_alignment(
    cache: &dyn TrendCache,
    symbol: &str,
    trend_string: Option<&str>,
    direction: Direction,
    min_count: usize,
) -> Result<AlignmentCheck> {
    let (pillars, source) = match trend_string {
        Some(s) => {
            let pillars = extract_pillars(s)?;
            cache.put(symbol, pillars);
            (pillars, PillarSource::Signal)
        }
        None => match cache.get(symbol) {
            Some(p) => (p, PillarSource::Cache),
            None => return Ok(AlignmentCheck::NoData),
        },
    };

    let count = pillars.alignment_count(direction);
    if count >= min_count {
        Ok(AlignmentCheck::Aligned { count, source })
    } else {
        Ok(AlignmentCheck::Misaligned { count, source })
    }
}
