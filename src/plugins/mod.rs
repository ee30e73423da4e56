pub mod combined;
pub mod price_action;

pub use combined::{CombinedDeps, CombinedPlugin, CombinedStats};
pub use price_action::{PriceActionDeps, PriceActionPlugin, PriceActionPlugins, VariantRules};

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::core::dual_order::LegOutcome;
use crate::core::routing::LogicTier;
use crate::models::{LegStatus, Signal, StrategyFamily};
use crate::storage::{LegRecord, SignalLogEntry, SignalLogRepository};

/// Outcome of an entry attempt. Negative paths carry a machine-readable `reason`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryResult {
    pub success: bool,
    pub reason: Option<String>,
    pub tier: Option<LogicTier>,
    pub lot: Option<f64>,
    pub orders: Vec<LegOutcome>,
    pub trade_id: Option<i64>,
}

impl EntryResult {
    pub fn rejected(reason: &str) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExitResult {
    pub success: bool,
    pub positions_closed: usize,
    pub total_pnl: f64,
    pub reason: Option<String>,
}

impl ExitResult {
    pub fn failed(reason: &str) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// Both halves of a reversal, each reported on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReversalResult {
    pub exit_result: ExitResult,
    pub entry_result: EntryResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoResult {
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalOutcome {
    Entry(EntryResult),
    Exit(ExitResult),
    Reversal(ReversalResult),
    Info(InfoResult),
}

impl SignalOutcome {
    pub fn success(&self) -> bool {
        match self {
            SignalOutcome::Entry(r) => r.success,
            SignalOutcome::Exit(r) => r.success,
            SignalOutcome::Reversal(r) => r.exit_result.success && r.entry_result.success,
            SignalOutcome::Info(r) => r.success,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SignalOutcome::Entry(r) => r.reason.as_deref(),
            SignalOutcome::Exit(r) => r.reason.as_deref(),
            SignalOutcome::Reversal(r) => r
                .entry_result
                .reason
                .as_deref()
                .or(r.exit_result.reason.as_deref()),
            SignalOutcome::Info(r) => r.reason.as_deref(),
        }
    }
}

/// A strategy family that owns its signals end to end. Never returns `Err`.
#[async_trait]
pub trait StrategyPlugin: Send + Sync {
    fn plugin_id(&self) -> &str;
    fn family(&self) -> StrategyFamily;
    async fn process_signal(&self, signal: &Signal) -> SignalOutcome;
}

pub(crate) fn log_entry(plugin_id: &str, signal: &Signal) -> SignalLogEntry {
    SignalLogEntry {
        plugin_id: plugin_id.to_string(),
        signal_type: signal.wire_type.clone(),
        symbol: signal.symbol.clone(),
        direction: signal.direction(),
        timeframe: signal.timeframe.clone(),
        consensus_score: signal.consensus_score,
        mtf_raw: signal.mtf.clone(),
        signal_json: serde_json::to_string(signal).unwrap_or_default(),
        processed: true,
        trade_placed: false,
        trade_id: None,
        skip_reason: None,
    }
}

/// Write the signal-log row; a logging failure never fails the signal.
pub(crate) fn record_signal(repo: &dyn SignalLogRepository, entry: SignalLogEntry) {
    if let Err(e) = repo.log_signal(&entry) {
        warn!("Could not log {} signal for {}: {}", entry.signal_type, entry.symbol, e);
    }
}

pub(crate) fn leg_record(leg: &LegOutcome) -> LegRecord {
    LegRecord {
        ticket: leg.ticket,
        lot_size: leg.lot,
        sl_price: leg.sl,
        tp_price: leg.tp,
        status: if leg.placed() { LegStatus::Open } else { LegStatus::Failed },
        profit_dollars: 0.0,
        error: leg.error.clone(),
    }
}
