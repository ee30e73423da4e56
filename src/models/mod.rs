pub mod direction;
pub mod signal;
pub mod timeframe;
pub mod variant;

pub use direction::*;
pub use signal::{EntryKind, ExitKind, InfoKind, RawAlert, Signal, SignalKind, StrategyFamily};
pub use timeframe::Timeframe;
pub use variant::PriceActionVariant;
