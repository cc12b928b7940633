//! Receipt validation backend interface.

use crate::protocol::ValidateResponse;
use crate::LedgerError;
use async_trait::async_trait;

/// Server-side receipt validation backend.
///
/// Takes the opaque signed receipt blob plus the application's shared
/// secret and returns the parsed entitlement payload. The blob is never
/// inspected client-side; authenticity is the validator's problem.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    /// Verify a receipt blob and return its parsed fields.
    ///
    /// # Errors
    /// `LedgerError::Validation` when the backend rejects the blob or is
    /// unreachable; `LedgerError::Protocol` when its response cannot be
    /// parsed.
    async fn verify(
        &self,
        receipt_blob: &[u8],
        shared_secret: &str,
    ) -> Result<ValidateResponse, LedgerError>;
}
