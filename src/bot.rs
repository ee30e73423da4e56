use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use zepix_trading_bot::config::{Config, ConfigSection, ConfigStore};
use zepix_trading_bot::core::mtf::{InMemoryTrendCache, TrendCache};
use zepix_trading_bot::models::{PriceActionVariant, Signal, StrategyFamily};
use zepix_trading_bot::plugins::{
    CombinedDeps, CombinedPlugin, PriceActionDeps, PriceActionPlugins, SignalOutcome,
    StrategyPlugin,
};
use zepix_trading_bot::services::{CachedTrendService, PaperBroker, SymbolLocks};
use zepix_trading_bot::storage::{
    CentralDb, CombinedDb, PluginRegistration, PluginType, PriceActionDb, PriceActionSource,
    Severity, TradeSource,
};
use zepix_trading_bot::sync::SyncManager;

const STATUS_INTERVAL_SECS: u64 = 300;
const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reads one alert per stdin line and hands each to its strategy family.
pub struct ZepixBot {
    config: Arc<ConfigStore>,
    broker: Arc<PaperBroker>,
    central: Arc<CentralDb>,
    combined: Arc<CombinedPlugin>,
    price_action: Arc<PriceActionPlugins>,
    sync: Option<Arc<SyncManager>>,
    tasks: JoinSet<()>,
}

impl ZepixBot {
    pub fn new(config: Arc<ConfigStore>) -> Result<Self> {
        let cfg = config.current();

        info!("{}", "=".repeat(60));
        info!("Zepix trading bot starting up (paper broker)");
        info!("Combined plugin: {} (enabled={})", cfg.combined.plugin_id, cfg.combined.enabled);
        for variant in PriceActionVariant::ALL {
            let v = cfg.price_action.variant(variant);
            info!(
                "  {}: enabled={} adx>={} conf>={} spread<={} risk x{}",
                variant.plugin_id(),
                v.enabled,
                v.min_adx,
                v.min_confidence,
                v.max_spread_pips,
                v.risk_multiplier
            );
        }
        info!("Order timeout: {:?}", cfg.order_timeout());
        info!("{}", "=".repeat(60));

        let combined_db = Arc::new(
            CombinedDb::open(&cfg.storage.combined_db)
                .with_context(|| format!("opening {}", cfg.storage.combined_db))?,
        );
        let price_action_db = Arc::new(
            PriceActionDb::open(&cfg.storage.price_action_db)
                .with_context(|| format!("opening {}", cfg.storage.price_action_db))?,
        );
        let central = Arc::new(
            CentralDb::open(&cfg.storage.central_db)
                .with_context(|| format!("opening {}", cfg.storage.central_db))?,
        );

        let broker = Arc::new(PaperBroker::new(cfg.paper.balance).with_default_spread(cfg.paper.spread_pips));
        let trend_cache: Arc<dyn TrendCache> = Arc::new(InMemoryTrendCache::new());
        let locks = Arc::new(SymbolLocks::new());

        let combined = Arc::new(CombinedPlugin::new(
            &cfg.combined,
            CombinedDeps {
                executor: broker.clone(),
                account: broker.clone(),
                trend_cache: Arc::clone(&trend_cache),
                trades: combined_db.clone(),
                signals: combined_db.clone(),
                locks: Arc::clone(&locks),
                order_timeout: cfg.order_timeout(),
            },
        ));
        let price_action = Arc::new(PriceActionPlugins::new(
            &cfg.price_action,
            PriceActionDeps {
                executor: broker.clone(),
                account: broker.clone(),
                trend: Arc::new(CachedTrendService::new(Arc::clone(&trend_cache))),
                trades: price_action_db.clone(),
                signals: price_action_db.clone(),
                locks,
                order_timeout: cfg.order_timeout(),
            },
        ));

        register_plugins(&central, &cfg)?;

        let sync = if cfg.sync.enabled {
            let mut sources: Vec<Arc<dyn TradeSource>> = vec![combined_db as Arc<dyn TradeSource>];
            for source in PriceActionSource::all(&price_action_db) {
                sources.push(Arc::new(source));
            }
            Some(Arc::new(SyncManager::new(
                Arc::clone(&central),
                sources,
                cfg.sync.interval(),
            )))
        } else {
            info!("Trade sync disabled");
            None
        };

        Ok(Self {
            config,
            broker,
            central,
            combined,
            price_action,
            sync,
            tasks: JoinSet::new(),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        if let Some(sync) = &self.sync {
            sync.start();
        }
        info!("Bot is now running. Reading alerts from stdin, Ctrl+C to stop.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut status = tokio::time::interval(tokio::time::Duration::from_secs(STATUS_INTERVAL_SECS));
        status.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    return Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(line.trim()).await,
                    Ok(None) => {
                        info!("Input closed, draining in-flight signals");
                        self.shutdown().await;
                        return Ok(());
                    }
                    Err(e) => {
                        error!("stdin read failed: {}", e);
                        self.shutdown().await;
                        return Err(e.into());
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Signal task panicked: {}", e);
                    }
                }
                _ = status.tick() => self.print_status(),
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        match line {
            "" => {}
            "status" => self.print_status(),
            "reload" => self.reload(Config::from_env()),
            "sync" => match &self.sync {
                Some(sync) => match sync.force_sync().await {
                    Ok(report) => info!("Forced sync: {} new, {} updated", report.total_inserted(), report.updated),
                    Err(e) => warn!("Forced sync failed: {}", e),
                },
                None => warn!("Trade sync is disabled"),
            },
            _ => self.dispatch(line),
        }
    }

    fn dispatch(&mut self, line: &str) {
        let signal = match Signal::from_json(line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Rejected alert ({}): {}", e.reason(), e);
                if let Err(db) = self.central.log_event(
                    "SIGNAL_REJECTED",
                    Severity::Warning,
                    "ingest",
                    &e.to_string(),
                    Some(line),
                ) {
                    error!("Could not record rejected alert: {}", db);
                }
                return;
            }
        };

        // The latest alert price marks the paper book.
        self.broker.set_price(&signal.symbol, signal.price);

        let plugin: Arc<dyn StrategyPlugin> = match signal.family {
            StrategyFamily::Combined => self.combined.clone(),
            StrategyFamily::PriceAction => self.price_action.clone(),
        };
        debug!("{} {} -> {}", signal.wire_type, signal.symbol, plugin.plugin_id());

        self.tasks.spawn(async move {
            let outcome = plugin.process_signal(&signal).await;
            report(&signal, plugin.plugin_id(), &outcome);
        });
    }

    /// Apply a fresh snapshot; only plugins whose section changed are rebuilt.
    fn reload(&self, next: Config) {
        let change = self.config.reload(next);
        if change.changed_sections.is_empty() {
            info!("Config reload: nothing changed (version {})", change.version);
            return;
        }
        if change.touches(ConfigSection::Combined) {
            self.combined.apply_config(&change.snapshot.combined);
        }
        if change.touches(ConfigSection::PriceAction) {
            self.price_action.apply_config(&change.snapshot.price_action);
        }
        for section in [ConfigSection::Storage, ConfigSection::Sync, ConfigSection::Paper, ConfigSection::Orders] {
            if change.touches(section) {
                warn!("Config section {} changed; takes effect on restart", section);
            }
        }
        let sections: Vec<String> = change.changed_sections.iter().map(|s| s.to_string()).collect();
        info!("Config reloaded to version {} ({})", change.version, sections.join(", "));
    }

    fn print_status(&self) {
        let combined = self.combined.stats();
        info!(
            "Combined: {} signals | {} entries | {} exits | {} info | {} errors | pairs {} (A fail {}, B fail {})",
            combined.signals_received,
            combined.entries,
            combined.exits,
            combined.info,
            combined.errors,
            combined.dual_orders.dual_orders_placed,
            combined.dual_orders.order_a_failed,
            combined.dual_orders.order_b_failed
        );
        let routing = self.combined.router().statistics();
        info!(
            "Routing: {:?} | override {} timeframe {} default {}",
            routing.routed, routing.by_override, routing.by_timeframe, routing.by_default
        );
        for plugin in self.price_action.variants() {
            let s = plugin.stats();
            info!(
                "{}: {} signals | {} entries | {} rejected | {} exits | {} errors",
                plugin.variant().plugin_id(),
                s.signals_received,
                s.entries,
                s.rejected,
                s.exits,
                s.errors
            );
        }
        info!(
            "Paper book: {} open | realized PnL ${:+.2}",
            self.broker.positions().len(),
            self.broker.realized_pnl()
        );
        if let Some(sync) = &self.sync {
            let status = sync.get_sync_status();
            info!(
                "Sync: {} passes ({} ok, {} failed), last {:?}",
                status.stats.total_syncs,
                status.stats.successful_syncs,
                status.stats.failed_syncs,
                status.stats.last_sync_time
            );
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("Signal task panicked: {}", e);
            }
        }
        if let Some(sync) = &self.sync {
            sync.stop().await;
        }
        self.print_status();
        info!("Bot stopped.");
    }
}

fn register_plugins(central: &CentralDb, cfg: &Config) -> Result<()> {
    central
        .register_plugin(&PluginRegistration {
            plugin_id: cfg.combined.plugin_id.clone(),
            plugin_type: PluginType::V3Combined,
            display_name: "Combined Logic".to_string(),
            version: PLUGIN_VERSION.to_string(),
            enabled: cfg.combined.enabled,
            database_path: cfg.storage.combined_db.clone(),
        })
        .context("registering combined plugin")?;

    for variant in PriceActionVariant::ALL {
        central
            .register_plugin(&PluginRegistration {
                plugin_id: variant.plugin_id().to_string(),
                plugin_type: PluginType::V6PriceAction,
                display_name: format!("Price Action {}", variant),
                version: PLUGIN_VERSION.to_string(),
                enabled: cfg.price_action.variant(variant).enabled,
                database_path: cfg.storage.price_action_db.clone(),
            })
            .with_context(|| format!("registering {}", variant.plugin_id()))?;
    }
    Ok(())
}

fn report(signal: &Signal, plugin_id: &str, outcome: &SignalOutcome) {
    match outcome {
        SignalOutcome::Entry(r) if r.success => info!(
            "[{}] {} {} entered: lot {:?} tier {:?} trade {:?}",
            plugin_id, signal.wire_type, signal.symbol, r.lot, r.tier, r.trade_id
        ),
        SignalOutcome::Exit(r) => info!(
            "[{}] {} {}: closed {} pnl {:+.2}",
            plugin_id, signal.wire_type, signal.symbol, r.positions_closed, r.total_pnl
        ),
        SignalOutcome::Reversal(r) => info!(
            "[{}] {} {}: closed {} pnl {:+.2}, re-entry {}",
            plugin_id,
            signal.wire_type,
            signal.symbol,
            r.exit_result.positions_closed,
            r.exit_result.total_pnl,
            r.entry_result.reason.as_deref().unwrap_or("placed")
        ),
        other => {
            if let Some(reason) = other.reason() {
                info!("[{}] {} {}: {}", plugin_id, signal.wire_type, signal.symbol, reason);
            }
        }
    }
}
