//! Error types for the paper-trading engine.
//!
//! Every kind maps to a disposition: recoverable errors stay local to the
//! affected candidate or position, and only an invalid configuration at
//! startup is fatal. Components never let a panic or a generic exception
//! cross a public boundary; skips travel as outcome values, errors as these.

use thiserror::Error;

/// Result type alias using the engine's error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Market-data fetch failed or returned too little history.
    #[error("market data unavailable for {symbol}: {detail}")]
    DataUnavailable { symbol: String, detail: String },

    /// The screener has no current recommendation for the symbol.
    #[error("no recommendation on file for {0}")]
    NoRecommendation(String),

    /// One or more entry-validator checks failed.
    #[error("entry validation failed for {symbol}: {reason}")]
    ValidationFailed { symbol: String, reason: String },

    /// An executor risk gate or circuit breaker rejected the trade.
    #[error("risk rejected for {symbol}: {reason}")]
    RiskRejected { symbol: String, reason: String },

    /// A ledger transaction failed to commit.
    #[error("ledger transaction failed: {0}")]
    TransactionFailed(String),

    /// Configuration was invalid at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Shutdown was requested while the operation was in flight.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// True for errors that should skip the current candidate without
    /// touching the ledger.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Error::DataUnavailable { .. }
                | Error::NoRecommendation(_)
                | Error::ValidationFailed { .. }
                | Error::RiskRejected { .. }
        )
    }

    /// True only for the startup-fatal kind.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigInvalid(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::TransactionFailed(e.to_string())
    }
}
