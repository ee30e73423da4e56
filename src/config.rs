use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::dual_order::DualOrderConfig;
use crate::core::routing::{LogicTier, RoutingConfig, TierParams};
use crate::core::sizing::SizingConfig;
use crate::error::{BotError, Result};
use crate::models::PriceActionVariant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedSettings {
    pub enabled: bool,
    pub plugin_id: String,
    /// Pillars that must agree with the entry direction.
    pub min_alignment: usize,
    pub routing: RoutingConfig,
    pub sizing: SizingConfig,
    pub dual_order: DualOrderConfig,
    /// Scale XAU/GOLD lots by 0.1 before clamping.
    pub metal_lot_scaling: bool,
}

impl Default for CombinedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            plugin_id: "combined_v3".to_string(),
            min_alignment: 3,
            routing: RoutingConfig::default(),
            sizing: SizingConfig::default(),
            dual_order: DualOrderConfig::default(),
            metal_lot_scaling: false,
        }
    }
}

/// Tunable thresholds of one price-action variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantSettings {
    pub enabled: bool,
    pub min_adx: f64,
    pub min_confidence: u32,
    pub max_spread_pips: f64,
    pub risk_multiplier: f64,
}

impl VariantSettings {
    pub fn defaults(variant: PriceActionVariant) -> Self {
        let (min_adx, min_confidence, max_spread_pips, risk_multiplier) = match variant {
            PriceActionVariant::M1 => (20.0, 80, 2.0, 0.5),
            PriceActionVariant::M5 => (25.0, 70, 3.0, 1.0),
            PriceActionVariant::M15 => (20.0, 70, 4.0, 1.0),
            PriceActionVariant::H1 => (20.0, 60, 5.0, 0.6),
        };
        Self {
            enabled: true,
            min_adx,
            min_confidence,
            max_spread_pips,
            risk_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceActionSettings {
    pub variants: BTreeMap<PriceActionVariant, VariantSettings>,
    pub dual_order: DualOrderConfig,
}

impl Default for PriceActionSettings {
    fn default() -> Self {
        Self {
            variants: PriceActionVariant::ALL
                .iter()
                .map(|v| (*v, VariantSettings::defaults(*v)))
                .collect(),
            dual_order: DualOrderConfig::default(),
        }
    }
}

impl PriceActionSettings {
    pub fn variant(&self, variant: PriceActionVariant) -> VariantSettings {
        self.variants
            .get(&variant)
            .copied()
            .unwrap_or_else(|| VariantSettings::defaults(variant))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub combined_db: String,
    pub price_action_db: String,
    pub central_db: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSettings {
    pub balance: f64,
    pub spread_pips: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub combined: CombinedSettings,
    pub price_action: PriceActionSettings,
    pub storage: StorageSettings,
    pub sync: SyncSettings,
    pub paper: PaperSettings,
    pub order_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key source; unset or unparsable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        let flag = |key: &str, default: bool| -> bool {
            match lookup(key) {
                Some(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
                None => default,
            }
        };

        let mut routing = RoutingConfig::default();
        if let Some(raw) = lookup("ROUTING_OVERRIDES") {
            match parse_tier_table(&raw) {
                Ok(table) => routing.overrides = table,
                Err(e) => warn!("Ignoring ROUTING_OVERRIDES: {}", e),
            }
        }
        if let Some(raw) = lookup("TIMEFRAME_ROUTING") {
            match parse_tier_table(&raw) {
                Ok(table) => routing.timeframes = table,
                Err(e) => warn!("Ignoring TIMEFRAME_ROUTING: {}", e),
            }
        }
        if let Some(tier) = lookup("DEFAULT_LOGIC").as_deref().and_then(LogicTier::from_str_loose) {
            routing.default_tier = tier;
        }
        for tier in LogicTier::ALL {
            let current = routing.tiers.get(tier);
            let params = TierParams {
                lot_multiplier: env(&format!("{}_LOT_MULT", tier), "")
                    .parse()
                    .unwrap_or(current.lot_multiplier),
                sl_multiplier: env(&format!("{}_SL_MULT", tier), "")
                    .parse()
                    .unwrap_or(current.sl_multiplier),
            };
            match tier {
                LogicTier::Logic1 => routing.tiers.logic1 = params,
                LogicTier::Logic2 => routing.tiers.logic2 = params,
                LogicTier::Logic3 => routing.tiers.logic3 = params,
            }
        }

        let mut sizing = SizingConfig::default();
        sizing.bounds.min_lot = env("MIN_LOT", "0.01").parse().unwrap_or(0.01);
        sizing.bounds.max_lot = env("MAX_LOT", "10.0").parse().unwrap_or(10.0);
        sizing.split_ratio = env("SPLIT_RATIO", "0.5").parse().unwrap_or(0.5);

        let mut dual_order = DualOrderConfig::default();
        dual_order.split_ratio = sizing.split_ratio;
        dual_order.min_lot = sizing.bounds.min_lot;
        dual_order.order_b_fixed_sl_usd = env("ORDER_B_FIXED_SL_USD", "10.0").parse().unwrap_or(10.0);

        let mut price_action = PriceActionSettings {
            dual_order: dual_order.clone(),
            ..Default::default()
        };
        for variant in PriceActionVariant::ALL {
            let prefix = variant.plugin_id().to_ascii_uppercase();
            let defaults = VariantSettings::defaults(variant);
            price_action.variants.insert(
                variant,
                VariantSettings {
                    enabled: flag(&format!("{}_ENABLED", prefix), true),
                    min_adx: env(&format!("{}_MIN_ADX", prefix), "")
                        .parse()
                        .unwrap_or(defaults.min_adx),
                    min_confidence: env(&format!("{}_MIN_CONFIDENCE", prefix), "")
                        .parse()
                        .unwrap_or(defaults.min_confidence),
                    max_spread_pips: env(&format!("{}_MAX_SPREAD", prefix), "")
                        .parse()
                        .unwrap_or(defaults.max_spread_pips),
                    risk_multiplier: env(&format!("{}_RISK_MULTIPLIER", prefix), "")
                        .parse()
                        .unwrap_or(defaults.risk_multiplier),
                },
            );
        }

        Config {
            combined: CombinedSettings {
                enabled: flag("COMBINED_ENABLED", true),
                plugin_id: env("COMBINED_PLUGIN_ID", "combined_v3"),
                min_alignment: env("MIN_MTF_ALIGNMENT", "3").parse().unwrap_or(3),
                routing,
                sizing,
                dual_order,
                metal_lot_scaling: flag("METAL_LOT_SCALING", false),
            },
            price_action,
            storage: StorageSettings {
                combined_db: env("COMBINED_DB_PATH", "data/combined_v3.db"),
                price_action_db: env("PRICE_ACTION_DB_PATH", "data/price_action_v6.db"),
                central_db: env("CENTRAL_DB_PATH", "data/central.db"),
            },
            sync: SyncSettings {
                enabled: flag("SYNC_ENABLED", true),
                interval_secs: env("SYNC_INTERVAL_SECS", "300").parse().unwrap_or(300),
            },
            paper: PaperSettings {
                balance: env("PAPER_BALANCE", "10000").parse().unwrap_or(10_000.0),
                spread_pips: env("PAPER_SPREAD_PIPS", "1.0").parse().unwrap_or(1.0),
            },
            order_timeout_secs: env("ORDER_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs.max(1))
    }

    /// Sections whose values differ from `other`.
    pub fn diff(&self, other: &Config) -> Vec<ConfigSection> {
        let mut changed = Vec::new();
        if self.combined != other.combined {
            changed.push(ConfigSection::Combined);
        }
        if self.price_action != other.price_action {
            changed.push(ConfigSection::PriceAction);
        }
        if self.storage != other.storage {
            changed.push(ConfigSection::Storage);
        }
        if self.sync != other.sync {
            changed.push(ConfigSection::Sync);
        }
        if self.paper != other.paper {
            changed.push(ConfigSection::Paper);
        }
        if self.order_timeout_secs != other.order_timeout_secs {
            changed.push(ConfigSection::Orders);
        }
        if self.log_level != other.log_level {
            changed.push(ConfigSection::Logging);
        }
        changed
    }
}

/// Parse `key=value,key=value` into a tier table.
pub fn parse_tier_table(raw: &str) -> Result<BTreeMap<String, LogicTier>> {
    let mut table = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| BotError::Config(format!("expected key=value, got '{}'", entry)))?;
        let tier = LogicTier::from_str_loose(value)
            .ok_or_else(|| BotError::Config(format!("unknown tier '{}' for '{}'", value.trim(), key.trim())))?;
        table.insert(key.trim().to_string(), tier);
    }
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigSection {
    Combined,
    PriceAction,
    Storage,
    Sync,
    Paper,
    Orders,
    Logging,
}

impl fmt::Display for ConfigSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigSection::Combined => "combined",
            ConfigSection::PriceAction => "price_action",
            ConfigSection::Storage => "storage",
            ConfigSection::Sync => "sync",
            ConfigSection::Paper => "paper",
            ConfigSection::Orders => "orders",
            ConfigSection::Logging => "logging",
        };
        write!(f, "{}", s)
    }
}

/// Result of a reload: the new version and what moved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub version: u64,
    pub changed_sections: Vec<ConfigSection>,
    pub snapshot: Arc<Config>,
}

impl ConfigChange {
    pub fn touches(&self, section: ConfigSection) -> bool {
        self.changed_sections.contains(&section)
    }
}

struct Versioned {
    version: u64,
    config: Arc<Config>,
}

/// Holds the current config snapshot. Readers get an `Arc` that never changes under them.
pub struct ConfigStore {
    inner: RwLock<Versioned>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                version: 1,
                config: Arc::new(config),
            }),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        match self.inner.read() {
            Ok(g) => Arc::clone(&g.config),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().config),
        }
    }

    pub fn version(&self) -> u64 {
        match self.inner.read() {
            Ok(g) => g.version,
            Err(poisoned) => poisoned.into_inner().version,
        }
    }

    /// Swap in `new`. The version only moves when something actually changed.
    pub fn reload(&self, new: Config) -> ConfigChange {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let changed = guard.config.diff(&new);
        if !changed.is_empty() {
            guard.version += 1;
            guard.config = Arc::new(new);
            info!(
                "Config reloaded to v{} ({})",
                guard.version,
                changed.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
            );
        }
        ConfigChange {
            version: guard.version,
            changed_sections: changed,
            snapshot: Arc::clone(&guard.config),
        }
    }
}
