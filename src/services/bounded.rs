use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{OpenOrder, OrderExecution, OrderRequest, Ticket};
use crate::error::{BotError, Result};

pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut`, failing with `BotError::Timeout` once `limit` elapses.
pub async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", operation, limit);
            Err(BotError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

/// Order execution with every broker call capped by a timeout.
pub struct BoundedExecution {
    inner: Arc<dyn OrderExecution>,
    limit: Duration,
}

impl BoundedExecution {
    pub fn new(inner: Arc<dyn OrderExecution>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[async_trait]
impl OrderExecution for BoundedExecution {
    async fn place_order(&self, request: &OrderRequest) -> Result<Ticket> {
        bounded("place_order", self.limit, self.inner.place_order(request)).await
    }

    async fn close_order(&self, ticket: Ticket, strategy_id: &str) -> Result<bool> {
        bounded("close_order", self.limit, self.inner.close_order(ticket, strategy_id)).await
    }

    async fn close_partial(&self, ticket: Ticket, lot: f64, strategy_id: &str) -> Result<bool> {
        bounded(
            "close_partial",
            self.limit,
            self.inner.close_partial(ticket, lot, strategy_id),
        )
        .await
    }

    async fn get_open_orders(&self, symbol: &str, strategy_id: &str) -> Result<Vec<OpenOrder>> {
        bounded(
            "get_open_orders",
            self.limit,
            self.inner.get_open_orders(symbol, strategy_id),
        )
        .await
    }
}
