use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Timeframe;

/// The four timeframe-pinned price-action strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriceActionVariant {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl PriceActionVariant {
    pub const ALL: [PriceActionVariant; 4] = [
        PriceActionVariant::M1,
        PriceActionVariant::M5,
        PriceActionVariant::M15,
        PriceActionVariant::H1,
    ];

    pub fn timeframe(&self) -> Timeframe {
        match self {
            PriceActionVariant::M1 => Timeframe::M1,
            PriceActionVariant::M5 => Timeframe::M5,
            PriceActionVariant::M15 => Timeframe::M15,
            PriceActionVariant::H1 => Timeframe::H1,
        }
    }

    pub fn for_timeframe(tf: Timeframe) -> Option<PriceActionVariant> {
        match tf {
            Timeframe::M1 => Some(PriceActionVariant::M1),
            Timeframe::M5 => Some(PriceActionVariant::M5),
            Timeframe::M15 => Some(PriceActionVariant::M15),
            Timeframe::H1 => Some(PriceActionVariant::H1),
            Timeframe::H4 | Timeframe::D1 => None,
        }
    }

    pub fn plugin_id(&self) -> &'static str {
        match self {
            PriceActionVariant::M1 => "price_action_1m",
            PriceActionVariant::M5 => "price_action_5m",
            PriceActionVariant::M15 => "price_action_15m",
            PriceActionVariant::H1 => "price_action_1h",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            PriceActionVariant::M1 => "price_action_1m_trades",
            PriceActionVariant::M5 => "price_action_5m_trades",
            PriceActionVariant::M15 => "price_action_15m_trades",
            PriceActionVariant::H1 => "price_action_1h_trades",
        }
    }

    pub fn from_plugin_id(id: &str) -> Option<PriceActionVariant> {
        Self::ALL.iter().copied().find(|v| v.plugin_id() == id)
    }
}

impl fmt::Display for PriceActionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plugin_id())
    }
}
