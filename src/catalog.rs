//! Catalog metadata cache with batched fetch coalescing.

use crate::events::EventChannel;
use crate::product::Product;
use crate::state::SharedState;
use crate::LedgerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// External source of catalog metadata.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch metadata for the given identifiers in one batched call.
    ///
    /// Identifiers the storefront does not know may simply be absent from
    /// the result.
    async fn fetch(&self, identifiers: &[String]) -> Result<Vec<Product>, LedgerError>;
}

/// Concurrency-safe catalog cache in front of a [`CatalogProvider`].
///
/// Items are retained for the process lifetime; there is no eviction.
pub(crate) struct ProductCatalog {
    provider: Arc<dyn CatalogProvider>,
    state: Arc<Mutex<SharedState>>,
    events: EventChannel<Product>,
}

impl ProductCatalog {
    pub(crate) fn new(
        provider: Arc<dyn CatalogProvider>,
        state: Arc<Mutex<SharedState>>,
        events: EventChannel<Product>,
    ) -> Self {
        Self {
            provider,
            state,
            events,
        }
    }

    /// Channel carrying one event per newly fetched catalog item.
    pub(crate) fn events(&self) -> &EventChannel<Product> {
        &self.events
    }

    /// Resolve identifiers to catalog items.
    ///
    /// Cached identifiers are served from memory; the rest go out in a
    /// single batched fetch. Identifiers the fetch fails to return are
    /// absent from the result, which callers must treat as "unresolvable"
    /// rather than an error. Concurrent calls for overlapping identifiers
    /// may each trigger their own fetch; the duplicate work is accepted
    /// and the cache stays consistent either way.
    pub(crate) async fn resolve(&self, identifiers: &[String]) -> HashMap<String, Product> {
        let mut result = HashMap::new();
        let mut pending = Vec::new();
        {
            let state = self.state.lock().expect("ledger state lock poisoned");
            for identifier in identifiers {
                if result.contains_key(identifier) || pending.contains(identifier) {
                    continue;
                }
                match state.products.get(identifier) {
                    Some(product) => {
                        result.insert(identifier.clone(), product.clone());
                    }
                    None => pending.push(identifier.clone()),
                }
            }
        }

        if pending.is_empty() {
            return result;
        }

        let fetched = match self.provider.fetch(&pending).await {
            Ok(products) => products,
            Err(error) => {
                warn!(%error, "catalog fetch failed; identifiers left unresolved");
                return result;
            }
        };

        {
            let mut state = self.state.lock().expect("ledger state lock poisoned");
            for product in &fetched {
                state
                    .products
                    .insert(product.identifier.clone(), product.clone());
            }
        }

        // Events fire after the cache commit so subscribers can re-resolve
        for product in fetched {
            result.insert(product.identifier.clone(), product.clone());
            self.events.emit(product);
        }

        result
    }
}
