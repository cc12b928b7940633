//! Validator response schema and receipt extraction.
//!
//! The validation backend returns a nested payload with one entry per
//! in-app purchase, including renewal duplicates. Conversion into
//! [`Receipt`] happens here in one place: any malformed field surfaces a
//! single [`LedgerError::Protocol`] instead of scattered lookup failures.

use crate::clock::Clock;
use crate::receipt::{Entitlement, Receipt};
use crate::LedgerError;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Parsed fields returned by the receipt validator.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
    /// The decoded receipt payload.
    pub receipt: ReceiptPayload,
}

/// Decoded receipt body.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptPayload {
    /// One entry per in-app purchase, renewals included.
    #[serde(default)]
    pub in_app: Vec<InAppEntry>,

    /// Receipt creation timestamp as milliseconds since the Unix epoch.
    #[serde(default)]
    pub receipt_creation_date_ms: Option<String>,
}

/// A single in-app purchase entry.
#[derive(Debug, Clone, Deserialize)]
pub struct InAppEntry {
    /// Product identifier of the purchase.
    pub product_id: String,

    /// Purchased quantity; absent means 1.
    #[serde(default)]
    pub quantity: Option<u32>,

    /// Subscription expiration as milliseconds since the Unix epoch.
    /// Absent for one-time purchases.
    #[serde(default)]
    pub expires_date_ms: Option<String>,
}

/// Parse a raw validator payload.
pub fn parse_validate_response(body: &[u8]) -> Result<ValidateResponse, LedgerError> {
    serde_json::from_slice(body)
        .map_err(|e| LedgerError::Protocol(format!("Failed to parse validator response: {}", e)))
}

/// Parse a millisecond-epoch string field.
fn parse_epoch_ms(field: &str, value: &str) -> Result<DateTime<Utc>, LedgerError> {
    let millis: i64 = value
        .parse()
        .map_err(|_| LedgerError::Protocol(format!("Invalid {}: {:?}", field, value)))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| LedgerError::Protocol(format!("Out-of-range {}: {:?}", field, value)))
}

impl Receipt {
    /// Build a receipt from a validator response.
    ///
    /// Renewal entries for the same product are deduplicated by latest
    /// expiration. A missing creation timestamp falls back to the current
    /// trusted time.
    pub fn from_response(
        response: &ValidateResponse,
        clock: &dyn Clock,
    ) -> Result<Receipt, LedgerError> {
        let created_at = match &response.receipt.receipt_creation_date_ms {
            Some(value) => parse_epoch_ms("receipt_creation_date_ms", value)?,
            None => clock.now_utc(),
        };

        let mut receipt = Receipt::empty(created_at);
        for entry in &response.receipt.in_app {
            let mut entitlement = match &entry.expires_date_ms {
                Some(value) => Entitlement::recurring(
                    &entry.product_id,
                    parse_epoch_ms("expires_date_ms", value)?,
                ),
                None => Entitlement::one_time(&entry.product_id),
            };
            entitlement.quantity = entry.quantity.unwrap_or(1).max(1);
            receipt.merge_entitlement(entitlement);
        }
        Ok(receipt)
    }
}
