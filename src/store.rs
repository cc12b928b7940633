//! Payment store collaborator interface.
//!
//! The store submits purchases, streams completion notifications for
//! current and restored transactions, and requires an explicit
//! acknowledgement once the engine has durably recorded a transaction's
//! effect. Implementations wrap a platform storefront; tests use
//! in-process doubles.

use crate::product::Product;
use crate::LedgerError;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Failure codes a store can report for a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// The user cancelled payment. Treated as a non-error by the engine.
    PaymentCancelled,
    /// The payment could not be processed.
    PaymentInvalid,
    /// Purchases are not allowed on this device or account.
    PaymentNotAllowed,
    /// The product exists in the catalog but is not currently for sale.
    ProductNotAvailable,
    /// The store could not be reached.
    NetworkFailure,
    /// The store failed for an unspecified reason. The engine treats this
    /// optimistically: the transaction may have succeeded server-side.
    Unknown,
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PaymentCancelled => "payment cancelled by user",
            Self::PaymentInvalid => "payment invalid",
            Self::PaymentNotAllowed => "payment not allowed",
            Self::ProductNotAvailable => "product not available",
            Self::NetworkFailure => "store unreachable",
            Self::Unknown => "unknown store error",
        };
        f.write_str(text)
    }
}

/// A transaction the store reports as completed or restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransaction {
    /// Product identifier the transaction was for.
    pub product_id: String,

    /// Opaque store reference used for acknowledgement.
    pub transaction_id: String,

    /// Whether the store is waiting for an acknowledgement.
    pub needs_acknowledgement: bool,
}

/// Details of a purchase the store accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseDetails {
    /// Product identifier that was purchased.
    pub product_id: String,

    /// Opaque store reference used for acknowledgement.
    pub transaction_id: String,

    /// Whether the store is waiting for an acknowledgement.
    pub needs_acknowledgement: bool,
}

/// Platform payment store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Submit a purchase for the given product.
    async fn submit_purchase(&self, product: &Product) -> Result<PurchaseDetails, StoreErrorCode>;

    /// Acknowledge a transaction whose effect is durably recorded.
    ///
    /// Must be called at most once per transaction, and never before the
    /// corresponding receipt merge has been committed.
    async fn acknowledge(&self, transaction_id: &str);

    /// Fetch the opaque signed receipt blob held by the store.
    async fn receipt_data(&self) -> Result<Vec<u8>, StoreErrorCode>;

    /// Channel of completion notifications.
    ///
    /// Consumed once by `Ledger::start`; batches may arrive at any time,
    /// including for purchases restored from a previous session.
    fn completions(&self) -> mpsc::UnboundedReceiver<Vec<CompletedTransaction>>;
}

impl From<StoreErrorCode> for LedgerError {
    fn from(code: StoreErrorCode) -> Self {
        LedgerError::Store(code)
    }
}
