//! Ledgerkit error types.

use crate::store::StoreErrorCode;
use thiserror::Error;

/// Errors that can occur during entitlement reconciliation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Purchase requested for an identifier the catalog could not resolve.
    #[error("No product in catalog for identifier: {identifier}")]
    NoProduct {
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// The receipt validator rejected the receipt or was unreachable.
    #[error("Receipt validation failed: {0}")]
    Validation(String),

    /// Failed to parse the validator's response payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The store reported a failure submitting a purchase.
    ///
    /// Payment cancellation and unknown store errors are never surfaced
    /// through this variant; they complete as a no-entitlement success.
    #[error("Store error: {0}")]
    Store(StoreErrorCode),

    /// Secure store I/O error.
    ///
    /// Receipt persistence is best-effort, so this reaches callers only
    /// through explicit secure-store operations, never through a merge.
    #[error("Secure store I/O error: {0}")]
    StoreIO(String),
}
