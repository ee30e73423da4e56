use async_trait::async_trait;
use std::sync::Arc;

use super::{MtfAlignment, TrendService};
use crate::core::mtf::{TrendCache, TrendSummary, DEFAULT_MIN_ALIGNMENT};
use crate::error::Result;
use crate::models::{Direction, MarketState, Timeframe};

/// Trend lookups answered from the pillars cached by `Trend_Pulse` alerts.
pub struct CachedTrendService {
    cache: Arc<dyn TrendCache>,
}

impl CachedTrendService {
    pub fn new(cache: Arc<dyn TrendCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TrendService for CachedTrendService {
    async fn get_mtf_alignment(&self, symbol: &str) -> Result<MtfAlignment> {
        let direction = self.cache.get(symbol).and_then(|p| match p.summary() {
            TrendSummary::Bullish => Some(Direction::Buy),
            TrendSummary::Bearish => Some(Direction::Sell),
            TrendSummary::Mixed => None,
        });
        Ok(MtfAlignment {
            aligned: direction.is_some(),
            direction,
        })
    }

    async fn check_pulse_alignment(&self, symbol: &str, direction: Direction) -> Result<bool> {
        Ok(self
            .cache
            .get(symbol)
            .map(|p| p.is_aligned(direction, DEFAULT_MIN_ALIGNMENT))
            .unwrap_or(false))
    }

    async fn check_timeframe_alignment(
        &self,
        symbol: &str,
        direction: Direction,
        timeframes: &[Timeframe],
    ) -> Result<bool> {
        let Some(pillars) = self.cache.get(symbol) else {
            return Ok(false);
        };
        let sign = direction.pillar_sign();
        Ok(timeframes
            .iter()
            .all(|tf| pillars.get(*tf).map_or(false, |v| v == sign)))
    }

    async fn get_market_state(&self, symbol: &str) -> Result<MarketState> {
        Ok(match self.cache.get(symbol).map(|p| p.summary()) {
            Some(TrendSummary::Bullish) => MarketState::TrendingBullish,
            Some(TrendSummary::Bearish) => MarketState::TrendingBearish,
            Some(TrendSummary::Mixed) => MarketState::Sideways,
            None => MarketState::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mtf::{InMemoryTrendCache, PillarSet};

    #[tokio::test]
    async fn answers_from_cache() {
        let cache = Arc::new(InMemoryTrendCache::new());
        cache.put("EURUSD", PillarSet::new([1, 1, 1, -1]).unwrap());
        let svc = CachedTrendService::new(cache);

        let a = svc.get_mtf_alignment("EURUSD").await.unwrap();
        assert!(a.aligned);
        assert_eq!(a.direction, Some(Direction::Buy));
        assert!(svc.check_pulse_alignment("EURUSD", Direction::Buy).await.unwrap());
        assert!(svc
            .check_timeframe_alignment("EURUSD", Direction::Buy, &[Timeframe::M15, Timeframe::H4])
            .await
            .unwrap());
        assert!(!svc
            .check_timeframe_alignment("EURUSD", Direction::Buy, &[Timeframe::H4, Timeframe::D1])
            .await
            .unwrap());
        assert_eq!(
            svc.get_market_state("EURUSD").await.unwrap(),
            MarketState::TrendingBullish
        );
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_aligned() {
        let svc = CachedTrendService::new(Arc::new(InMemoryTrendCache::new()));
        assert!(!svc.check_pulse_alignment("GBPUSD", Direction::Sell).await.unwrap());
        assert_eq!(svc.get_market_state("GBPUSD").await.unwrap(), MarketState::Unknown);
    }
}
