#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zepix_trading_bot::config::Config;
use zepix_trading_bot::core::mtf::InMemoryTrendCache;
use zepix_trading_bot::error::{BotError, Result};
use zepix_trading_bot::models::{Direction, Signal, TradeStatus};
use zepix_trading_bot::plugins::{CombinedDeps, CombinedPlugin, PriceActionDeps, PriceActionPlugins};
use zepix_trading_bot::services::{
    CachedTrendService, OpenOrder, OrderExecution, OrderRequest, PaperBroker, SymbolLocks, Ticket,
};
use zepix_trading_bot::storage::{
    AggregatedTrade, CentralDb, CombinedDb, PluginType, PriceActionDb, PriceActionSource,
    TradeSource,
};
use zepix_trading_bot::sync::SyncManager;

pub fn alert(json: &str) -> Signal {
    Signal::from_json(json).unwrap()
}

/// Paper broker that rejects any order whose comment contains `fail_on`.
pub struct FlakyBroker {
    pub inner: Arc<PaperBroker>,
    fail_on: Mutex<Option<String>>,
}

impl FlakyBroker {
    pub fn new(inner: Arc<PaperBroker>) -> Self {
        Self {
            inner,
            fail_on: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }
}

#[async_trait]
impl OrderExecution for FlakyBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<Ticket> {
        let needle = self.fail_on.lock().unwrap().clone();
        if let Some(needle) = needle {
            if request.comment.contains(&needle) {
                return Err(BotError::OrderRejected(format!("rejected {}", request.comment)));
            }
        }
        self.inner.place_order(request).await
    }

    async fn close_order(&self, ticket: Ticket, strategy_id: &str) -> Result<bool> {
        self.inner.close_order(ticket, strategy_id).await
    }

    async fn close_partial(&self, ticket: Ticket, lot: f64, strategy_id: &str) -> Result<bool> {
        self.inner.close_partial(ticket, lot, strategy_id).await
    }

    async fn get_open_orders(&self, symbol: &str, strategy_id: &str) -> Result<Vec<OpenOrder>> {
        self.inner.get_open_orders(symbol, strategy_id).await
    }
}

/// Both strategy families over in-memory databases and one paper book.
pub struct Stack {
    pub paper: Arc<PaperBroker>,
    pub broker: Arc<FlakyBroker>,
    pub combined_db: Arc<CombinedDb>,
    pub price_action_db: Arc<PriceActionDb>,
    pub central: Arc<CentralDb>,
    pub cache: Arc<InMemoryTrendCache>,
    pub combined: CombinedPlugin,
    pub price_action: PriceActionPlugins,
}

impl Stack {
    pub fn new(cfg: &Config, balance: f64) -> Stack {
        let paper = Arc::new(PaperBroker::new(balance));
        let broker = Arc::new(FlakyBroker::new(paper.clone()));
        let combined_db = Arc::new(CombinedDb::open_in_memory().unwrap());
        let price_action_db = Arc::new(PriceActionDb::open_in_memory().unwrap());
        let central = Arc::new(CentralDb::open_in_memory().unwrap());
        let cache = Arc::new(InMemoryTrendCache::new());
        let locks = Arc::new(SymbolLocks::new());

        let combined = CombinedPlugin::new(
            &cfg.combined,
            CombinedDeps {
                executor: broker.clone(),
                account: paper.clone(),
                trend_cache: cache.clone(),
                trades: combined_db.clone(),
                signals: combined_db.clone(),
                locks: locks.clone(),
                order_timeout: Duration::from_secs(5),
            },
        );
        let price_action = PriceActionPlugins::new(
            &cfg.price_action,
            PriceActionDeps {
                executor: broker.clone(),
                account: paper.clone(),
                trend: Arc::new(CachedTrendService::new(cache.clone())),
                trades: price_action_db.clone(),
                signals: price_action_db.clone(),
                locks,
                order_timeout: Duration::from_secs(5),
            },
        );

        Stack {
            paper,
            broker,
            combined_db,
            price_action_db,
            central,
            cache,
            combined,
            price_action,
        }
    }

    pub fn sync_manager(&self) -> Arc<SyncManager> {
        let mut sources: Vec<Arc<dyn TradeSource>> = vec![self.combined_db.clone() as Arc<dyn TradeSource>];
        for source in PriceActionSource::all(&self.price_action_db) {
            sources.push(Arc::new(source));
        }
        Arc::new(SyncManager::new(self.central.clone(), sources, Duration::from_secs(300)))
    }
}

/// Trade source serving a fixed list of rows.
pub struct ScriptedSource {
    pub plugin_id: String,
    pub rows: Vec<AggregatedTrade>,
}

impl TradeSource for ScriptedSource {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::V6PriceAction
    }

    fn fetch_since(&self, after_id: i64) -> Result<Vec<AggregatedTrade>> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.source_trade_id > after_id)
            .cloned()
            .collect())
    }

    fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<AggregatedTrade>> {
        Ok(self
            .rows
            .iter()
            .filter(|r| ids.contains(&r.source_trade_id))
            .cloned()
            .collect())
    }
}

pub fn aggregated_row(plugin_id: &str, id: i64, symbol: &str) -> AggregatedTrade {
    let entry_time: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    AggregatedTrade {
        plugin_id: plugin_id.to_string(),
        plugin_type: PluginType::V6PriceAction,
        source_trade_id: id,
        mt5_ticket: Some(1000 + id),
        symbol: symbol.to_string(),
        direction: Direction::Buy,
        lot_size: 0.1,
        entry_price: 1.1,
        entry_time,
        exit_price: None,
        exit_time: None,
        profit_pips: 0.0,
        profit_dollars: 0.0,
        status: TradeStatus::Open,
    }
}
