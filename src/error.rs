use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    /// Malformed multi-timeframe trend string.
    #[error("Format error: {0}")]
    Format(String),

    #[error("Unknown signal type: {0}")]
    UnknownSignal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timeout after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// Errors worth retrying on the next attempt (network/broker/db contention).
    pub fn is_recoverable(&self) -> bool {
        match self {
            BotError::Timeout { .. } | BotError::Service(_) => true,
            BotError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Short machine-readable tag used in result `reason` fields.
    pub fn reason(&self) -> &'static str {
        match self {
            BotError::Format(_) => "invalid_mtf_format",
            BotError::UnknownSignal(_) => "unknown_signal_type",
            BotError::Database(_) => "database_error",
            BotError::Serialization(_) => "serialization_error",
            BotError::Timeout { .. } => "timeout",
            BotError::OrderRejected(_) => "order_rejected",
            BotError::Service(_) => "service_error",
            BotError::Config(_) => "config_error",
        }
    }
}
