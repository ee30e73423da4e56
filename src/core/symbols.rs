use serde::{Deserialize, Serialize};

use crate::models::Direction;

/// Instrument families with distinct point-value assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolClass {
    Metal,
    Yen,
    Standard,
}

impl SymbolClass {
    pub fn of(symbol: &str) -> SymbolClass {
        let s = symbol.to_ascii_uppercase();
        if s.contains("XAU") || s.contains("GOLD") || s.contains("XAG") {
            SymbolClass::Metal
        } else if s.contains("JPY") {
            SymbolClass::Yen
        } else {
            SymbolClass::Standard
        }
    }

    /// Price movement counted as one pip.
    pub fn pip_size(&self) -> f64 {
        match self {
            SymbolClass::Metal => 1.0,
            SymbolClass::Yen => 0.01,
            SymbolClass::Standard => 0.0001,
        }
    }

    /// Account currency per pip per standard lot.
    pub fn pip_value(&self) -> f64 {
        match self {
            SymbolClass::Metal => 1.0,
            SymbolClass::Yen | SymbolClass::Standard => 10.0,
        }
    }
}

/// Realised P/L in account currency, rounded to cents.
pub fn calculate_pnl(entry: f64, exit: f64, lot: f64, direction: Direction, symbol: &str) -> f64 {
    let class = SymbolClass::of(symbol);
    let delta = match direction {
        Direction::Buy => exit - entry,
        Direction::Sell => entry - exit,
    };
    let pips = delta / class.pip_size();
    round2(pips * class.pip_value() * lot)
}

pub fn price_to_pips(distance: f64, symbol: &str) -> f64 {
    distance.abs() / SymbolClass::of(symbol).pip_size()
}

/// Round to cents, the precision lots and dollar amounts are kept at.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_symbols() {
        assert_eq!(SymbolClass::of("XAUUSD"), SymbolClass::Metal);
        assert_eq!(SymbolClass::of("gold"), SymbolClass::Metal);
        assert_eq!(SymbolClass::of("USDJPY"), SymbolClass::Yen);
        assert_eq!(SymbolClass::of("EURUSD"), SymbolClass::Standard);
    }

    #[test]
    fn pnl_per_class() {
        // 20 pips on 1 lot EURUSD = $200
        assert!((calculate_pnl(1.1000, 1.1020, 1.0, Direction::Buy, "EURUSD") - 200.0).abs() < 1e-6);
        // Short USDJPY 50 pips on 0.1 lot = $50
        assert!((calculate_pnl(150.00, 149.50, 0.1, Direction::Sell, "USDJPY") - 50.0).abs() < 1e-6);
        // Gold $10 move on 0.5 lot = $5
        assert!((calculate_pnl(2000.0, 1990.0, 0.5, Direction::Sell, "XAUUSD") - 5.0).abs() < 1e-6);
        assert!(calculate_pnl(2000.0, 1990.0, 0.5, Direction::Buy, "XAUUSD") < 0.0);
    }

    #[test]
    fn pips_from_distance() {
        assert!((price_to_pips(0.0020, "EURUSD") - 20.0).abs() < 1e-6);
        assert!((price_to_pips(-0.5, "USDJPY") - 50.0).abs() < 1e-6);
    }

    #[test]
    fn round2_keeps_cents() {
        assert_eq!(round2(0.1028), 0.10);
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-3.456), -3.46);
        assert_eq!(round2(12.0), 12.0);
    }
}
