//! Engine error taxonomy
//!
//! Input validation failures reject before any side effect. Policy denials
//! (rate limits, failed geofences, low anti-cheat scores) are *not* errors:
//! they are structured `Ok` results so callers always get a decision they can
//! render. Storage failures fail closed on trust-affecting writes.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or out-of-range input. No side effects were performed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A check-in for this (user, promotion) already exists in the trailing
    /// 24-hour window. No new record was created.
    #[error("already checked in at {checked_in_at}")]
    AlreadyCheckedIn { checked_in_at: DateTime<Utc> },

    /// The backing store could not confirm a trust-affecting read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The external balance ledger rejected or failed a credit.
    #[error("ledger credit failed: {0}")]
    Ledger(String),
}

impl EngineError {
    /// Machine-readable reason code for wire responses.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::AlreadyCheckedIn { .. } => "already_checked_in",
            EngineError::Store(_) => "store_unavailable",
            EngineError::Ledger(_) => "ledger_unavailable",
        }
    }
}
