//! Mutable state shared across the engine.
//!
//! One lock guards the receipt, the catalog cache, and the shared secret
//! so queries never observe a half-committed merge. Critical sections are
//! short; no I/O happens while the lock is held.

use crate::product::Product;
use crate::receipt::Receipt;
use std::collections::HashMap;

/// Everything behind the engine's single mutual-exclusion domain.
#[derive(Debug)]
pub(crate) struct SharedState {
    /// Current authoritative receipt.
    pub(crate) receipt: Receipt,

    /// Catalog items fetched so far, keyed by identifier.
    pub(crate) products: HashMap<String, Product>,

    /// Validation shared secret, set by `start`.
    pub(crate) shared_secret: Option<String>,
}

impl SharedState {
    pub(crate) fn new(receipt: Receipt) -> Self {
        Self {
            receipt,
            products: HashMap::new(),
            shared_secret: None,
        }
    }
}
