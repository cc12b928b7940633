//! Reconciliation engine - the main public API for ledgerkit.
//!
//! The [`Ledger`] merges raw transaction completions with server-validated
//! receipt data, persists the merged result, answers entitlement queries,
//! and publishes events for receipt updates, purchase completions, and
//! catalog fetches.

use crate::catalog::{CatalogProvider, ProductCatalog};
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::events::{EventChannel, EventStream};
use crate::keystore::{FileStore, SecureStore};
use crate::product::Product;
use crate::receipt::{Entitlement, Receipt};
use crate::state::SharedState;
use crate::store::{CompletedTransaction, Store, StoreErrorCode};
use crate::validator::ReceiptValidator;
use crate::LedgerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Secure-store key the serialized receipt lives under.
const RECEIPT_KEY: &str = "receipt";

/// Outcome of a completed purchase call.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    /// The catalog item the purchase was submitted for.
    pub product: Product,

    /// The reconciled entitlement, if the purchase produced one.
    ///
    /// `None` when the user cancelled payment or the store failed with an
    /// unknown error; both complete without an entitlement change.
    pub entitlement: Option<Entitlement>,
}

/// Purchase reconciliation engine.
///
/// Construct one per process with injected collaborators and clone the
/// handle freely; all clones share state.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<Inner>,
}

struct Inner {
    config: LedgerConfig,
    store: Arc<dyn Store>,
    validator: Arc<dyn ReceiptValidator>,
    secure_store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    catalog: ProductCatalog,
    state: Arc<Mutex<SharedState>>,
    receipt_events: EventChannel<Receipt>,
    purchase_events: EventChannel<Entitlement>,
}

impl Ledger {
    /// Create a new engine with the given configuration and collaborators.
    ///
    /// Receipts are persisted to a [`FileStore`] under the configured
    /// `storage_namespace`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The storage directory cannot be created
    pub fn new(
        config: LedgerConfig,
        store: Arc<dyn Store>,
        validator: Arc<dyn ReceiptValidator>,
        catalog_provider: Arc<dyn CatalogProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        let secure_store = Arc::new(FileStore::new(config.storage_namespace)?);
        Self::with_secure_store(config, store, validator, secure_store, catalog_provider, clock)
    }

    /// Create an engine with a custom persistence backend instead of the
    /// default [`FileStore`].
    ///
    /// Loads the persisted receipt from the secure store; a missing or
    /// undecodable blob degrades to an empty receipt rather than failing.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails.
    pub fn with_secure_store(
        config: LedgerConfig,
        store: Arc<dyn Store>,
        validator: Arc<dyn ReceiptValidator>,
        secure_store: Arc<dyn SecureStore>,
        catalog_provider: Arc<dyn CatalogProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;

        let receipt = load_cached_receipt(secure_store.as_ref(), clock.as_ref());
        let state = Arc::new(Mutex::new(SharedState::new(receipt)));
        let catalog = ProductCatalog::new(
            catalog_provider,
            Arc::clone(&state),
            EventChannel::new(config.event_capacity),
        );
        let receipt_events = EventChannel::with_replay(config.event_capacity);
        let purchase_events = EventChannel::new(config.event_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                validator,
                secure_store,
                clock,
                catalog,
                state,
                receipt_events,
                purchase_events,
            }),
        })
    }

    /// Start reconciliation.
    ///
    /// Stores the shared secret, synchronizes the trusted clock, spawns
    /// the listener for store completion notifications (which may fire at
    /// any time, including for purchases restored from a previous
    /// session), and performs an initial reconciliation pass.
    pub async fn start(&self, shared_secret: &str) {
        {
            let mut state = self.lock_state();
            state.shared_secret = Some(shared_secret.to_string());
        }

        self.inner.clock.sync().await;

        let mut completions = self.inner.store.completions();
        let listener = self.clone();
        tokio::spawn(async move {
            while let Some(transactions) = completions.recv().await {
                listener.handle_completed_transactions(transactions).await;
            }
        });

        match self.refresh_receipt().await {
            Ok(receipt) => {
                info!(entitlements = receipt.entitlements.len(), "receipt validated");
            }
            Err(error) => warn!(%error, "initial receipt validation failed"),
        }
    }

    /// Validate the receipt and replace the persisted state with the
    /// merged result.
    ///
    /// With `skip_validation` set, republishes the current receipt
    /// unchanged. On validation failure the existing receipt is left
    /// untouched and the error is reported without retry.
    ///
    /// # Errors
    /// `LedgerError::Validation` or `LedgerError::Protocol` from the
    /// validator round-trip.
    ///
    /// # Panics
    /// If called before [`start`] set a shared secret while
    /// `skip_validation` is off. That is a programming error, not a
    /// reportable failure.
    ///
    /// [`start`]: Ledger::start
    pub async fn refresh_receipt(&self) -> Result<Receipt, LedgerError> {
        if self.inner.config.skip_validation {
            let receipt = self.lock_state().receipt.clone();
            self.inner.receipt_events.emit(receipt.clone());
            return Ok(receipt);
        }

        let secret = self
            .lock_state()
            .shared_secret
            .clone()
            .expect("refresh_receipt called before start");

        // I/O happens without the state lock
        let blob = self
            .inner
            .store
            .receipt_data()
            .await
            .map_err(|code| LedgerError::Validation(format!("receipt unavailable: {}", code)))?;
        let response = self.inner.validator.verify(&blob, &secret).await?;
        let parsed = Receipt::from_response(&response, self.inner.clock.as_ref())?;

        let merged = {
            let mut state = self.lock_state();
            let merged = state.receipt.merged_with(parsed);
            state.receipt = merged.clone();
            merged
        };

        self.persist(&merged);
        self.inner.receipt_events.emit(merged.clone());
        Ok(merged)
    }

    /// Reconcile a batch of completed or restored transactions.
    ///
    /// In `skip_validation` mode each transaction's entitlement is
    /// synthesized locally and folded into the receipt immediately;
    /// otherwise durability comes from the validation pass. Transactions
    /// are acknowledged to the store only once their effect is durably
    /// recorded, and a purchase event fires for each acknowledged
    /// transaction whose entitlement is present afterwards.
    pub async fn handle_completed_transactions(&self, transactions: Vec<CompletedTransaction>) {
        let identifiers: Vec<String> = transactions
            .iter()
            .map(|tx| tx.product_id.clone())
            .collect();
        let products = self.inner.catalog.resolve(&identifiers).await;

        if self.inner.config.skip_validation {
            self.synthesize_locally(&transactions, &products);
        }

        // Merge/validate first, acknowledge second: acknowledging before
        // the merge is durable risks losing the entitlement on crash.
        let validated = match self.refresh_receipt().await {
            Ok(_) => true,
            Err(error) => {
                warn!(%error, "receipt refresh failed while reconciling transactions");
                false
            }
        };
        let durable = validated || self.inner.config.skip_validation;
        if !durable {
            return;
        }

        for transaction in &transactions {
            if transaction.needs_acknowledgement {
                self.inner
                    .store
                    .acknowledge(&transaction.transaction_id)
                    .await;
                debug!(
                    transaction = %transaction.transaction_id,
                    "transaction acknowledged"
                );
            }
            let entitlement = self
                .lock_state()
                .receipt
                .entitlement(&transaction.product_id)
                .cloned();
            if let Some(entitlement) = entitlement {
                self.inner.purchase_events.emit(entitlement);
            }
        }
    }

    /// Purchase a product by catalog identifier.
    ///
    /// The identifier is resolved through the catalog cache first; the
    /// store is never contacted for an unresolvable identifier. A payment
    /// cancelled by the user completes as a success without an
    /// entitlement. An unknown store error may mask a transaction that
    /// actually succeeded server-side, so it triggers a best-effort
    /// background refresh and also completes as a success; this
    /// optimistic policy is deliberate.
    ///
    /// # Errors
    /// `LedgerError::NoProduct` for an unresolvable identifier,
    /// `LedgerError::Store` for store failures other than the two treated
    /// as non-errors, `LedgerError::Validation`/`Protocol` when the
    /// post-purchase validation pass fails.
    pub async fn purchase_product(&self, identifier: &str) -> Result<PurchaseOutcome, LedgerError> {
        let resolved = self.inner.catalog.resolve(&[identifier.to_string()]).await;
        let product = resolved
            .get(identifier)
            .cloned()
            .ok_or_else(|| LedgerError::NoProduct {
                identifier: identifier.to_string(),
            })?;

        let details = match self.inner.store.submit_purchase(&product).await {
            Ok(details) => details,
            Err(StoreErrorCode::PaymentCancelled) => {
                debug!(identifier, "payment cancelled by user");
                return Ok(PurchaseOutcome {
                    product,
                    entitlement: None,
                });
            }
            Err(StoreErrorCode::Unknown) => {
                // The transaction may have gone through server-side; kick
                // off a refresh and report success without an entitlement.
                warn!(identifier, "unknown store error; refreshing receipt in background");
                let background = self.clone();
                tokio::spawn(async move {
                    if let Err(error) = background.refresh_receipt().await {
                        debug!(%error, "background receipt refresh failed");
                    }
                });
                return Ok(PurchaseOutcome {
                    product,
                    entitlement: None,
                });
            }
            Err(code) => return Err(LedgerError::Store(code)),
        };

        if self.inner.config.skip_validation {
            let entitlement = Entitlement::from_product(&product, self.inner.clock.as_ref());
            self.fold_entitlement(entitlement);
        }

        // Merge before acknowledgement, acknowledgement before the event
        self.refresh_receipt().await?;

        if details.needs_acknowledgement {
            self.inner.store.acknowledge(&details.transaction_id).await;
        }

        let entitlement = self
            .lock_state()
            .receipt
            .entitlement(&product.identifier)
            .cloned();
        if let Some(entitlement) = entitlement.clone() {
            self.inner.purchase_events.emit(entitlement);
        }

        Ok(PurchaseOutcome {
            product,
            entitlement,
        })
    }

    /// Resolve catalog metadata for a set of identifiers.
    ///
    /// Identifiers missing from the returned map were unresolvable,
    /// either unknown to the storefront or unreachable; that is not an
    /// error by itself.
    pub async fn fetch_products(&self, identifiers: &[String]) -> HashMap<String, Product> {
        self.inner.catalog.resolve(identifiers).await
    }

    /// Whether the user currently holds an active entitlement for the
    /// identifier.
    ///
    /// One-time purchases never lapse; recurring ones are active strictly
    /// before their expiration per the trusted clock. Never errors:
    /// absence of validated data reads as "not purchased".
    pub fn is_entitled(&self, identifier: &str) -> bool {
        let now = self.inner.clock.now_utc();
        self.lock_state()
            .receipt
            .entitlement(identifier)
            .is_some_and(|record| record.is_active(now))
    }

    /// Whether any purchase has ever been reconciled.
    pub fn has_any_entitlement(&self) -> bool {
        !self.lock_state().receipt.is_empty()
    }

    /// Whether any recurring entitlement is active per the trusted clock.
    pub fn has_any_active_subscription(&self) -> bool {
        let now = self.inner.clock.now_utc();
        self.lock_state()
            .receipt
            .entitlements
            .values()
            .any(|record| {
                record.kind == crate::receipt::EntitlementKind::Recurring && record.is_active(now)
            })
    }

    /// Look up the reconciled record for an identifier.
    pub fn entitlement(&self, identifier: &str) -> Option<Entitlement> {
        self.lock_state().receipt.entitlement(identifier).cloned()
    }

    /// Snapshot of the current receipt.
    pub fn receipt(&self) -> Receipt {
        self.lock_state().receipt.clone()
    }

    /// Drop the persisted receipt and reset the in-memory one to empty.
    ///
    /// Publishes the now-empty receipt. Entitlements come back on the
    /// next successful validation pass.
    pub fn remove_cached_receipt(&self) {
        let empty = Receipt::empty(self.inner.clock.now_utc());
        {
            let mut state = self.lock_state();
            state.receipt = empty.clone();
        }
        if let Err(error) = self.inner.secure_store.remove_all() {
            warn!(%error, "failed to clear persisted receipt");
        }
        self.inner.receipt_events.emit(empty);
    }

    /// Subscribe to receipt updates. The most recent receipt, if any, is
    /// replayed immediately.
    pub fn subscribe_receipt_updates(&self) -> EventStream<Receipt> {
        self.inner.receipt_events.subscribe()
    }

    /// Subscribe to individual purchase completions.
    pub fn subscribe_purchases(&self) -> EventStream<Entitlement> {
        self.inner.purchase_events.subscribe()
    }

    /// Subscribe to catalog items as they are fetched.
    pub fn subscribe_products(&self) -> EventStream<Product> {
        self.inner.catalog.events().subscribe()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Synthesize entitlements for transactions without a validator
    /// round-trip and fold them into the receipt (sandbox path).
    ///
    /// Transactions whose product did not resolve degrade to a one-time
    /// record; local trust has nothing better to go on.
    fn synthesize_locally(
        &self,
        transactions: &[CompletedTransaction],
        products: &HashMap<String, Product>,
    ) {
        for transaction in transactions {
            let entitlement = match products.get(&transaction.product_id) {
                Some(product) => Entitlement::from_product(product, self.inner.clock.as_ref()),
                None => Entitlement::one_time(&transaction.product_id),
            };
            self.fold_entitlement(entitlement);
        }
    }

    /// Fold one synthesized record into the receipt, persist, publish.
    fn fold_entitlement(&self, entitlement: Entitlement) {
        let merged = {
            let mut state = self.lock_state();
            state.receipt.merge_entitlement(entitlement);
            state.receipt.clone()
        };
        self.persist(&merged);
        self.inner.receipt_events.emit(merged);
    }

    /// Persist the receipt, best-effort. The in-memory receipt stays
    /// authoritative for the process lifetime if the write fails.
    fn persist(&self, receipt: &Receipt) {
        let bytes = match serde_json::to_vec(receipt) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "failed to serialize receipt");
                return;
            }
        };
        if let Err(error) = self.inner.secure_store.set(RECEIPT_KEY, &bytes) {
            warn!(%error, "failed to persist receipt");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.inner.state.lock().expect("ledger state lock poisoned")
    }
}

/// Load the persisted receipt, degrading to an empty one on any failure.
fn load_cached_receipt(secure_store: &dyn SecureStore, clock: &dyn Clock) -> Receipt {
    match secure_store.get(RECEIPT_KEY) {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(receipt) => receipt,
            Err(error) => {
                warn!(%error, "persisted receipt undecodable; starting empty");
                Receipt::empty(clock.now_utc())
            }
        },
        Ok(None) => Receipt::empty(clock.now_utc()),
        Err(error) => {
            warn!(%error, "secure store unreadable; starting empty");
            Receipt::empty(clock.now_utc())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::period::SubscriptionPeriod;
    use crate::product::tests::make_product;
    use crate::protocol::{parse_validate_response, ValidateResponse};
    use crate::receipt::EntitlementKind;
    use crate::store::PurchaseDetails;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    // ---- test doubles -------------------------------------------------

    struct MockStore {
        purchase_result: Mutex<Result<PurchaseDetails, StoreErrorCode>>,
        receipt_blob: Mutex<Vec<u8>>,
        purchases: Mutex<Vec<String>>,
        acknowledged: Mutex<Vec<String>>,
        completions_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<CompletedTransaction>>>>,
        completions_tx: mpsc::UnboundedSender<Vec<CompletedTransaction>>,
    }

    impl MockStore {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                purchase_result: Mutex::new(Ok(PurchaseDetails {
                    product_id: String::new(),
                    transaction_id: "tx-1".to_string(),
                    needs_acknowledgement: true,
                })),
                receipt_blob: Mutex::new(b"opaque-blob".to_vec()),
                purchases: Mutex::new(Vec::new()),
                acknowledged: Mutex::new(Vec::new()),
                completions_rx: Mutex::new(Some(rx)),
                completions_tx: tx,
            }
        }

        fn fail_purchases_with(&self, code: StoreErrorCode) {
            *self.purchase_result.lock().unwrap() = Err(code);
        }

        fn purchases(&self) -> Vec<String> {
            self.purchases.lock().unwrap().clone()
        }

        fn acknowledged(&self) -> Vec<String> {
            self.acknowledged.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Store for MockStore {
        async fn submit_purchase(
            &self,
            product: &Product,
        ) -> Result<PurchaseDetails, StoreErrorCode> {
            self.purchases
                .lock()
                .unwrap()
                .push(product.identifier.clone());
            self.purchase_result
                .lock()
                .unwrap()
                .clone()
                .map(|mut details| {
                    details.product_id = product.identifier.clone();
                    details
                })
        }

        async fn acknowledge(&self, transaction_id: &str) {
            self.acknowledged
                .lock()
                .unwrap()
                .push(transaction_id.to_string());
        }

        async fn receipt_data(&self) -> Result<Vec<u8>, StoreErrorCode> {
            Ok(self.receipt_blob.lock().unwrap().clone())
        }

        fn completions(&self) -> mpsc::UnboundedReceiver<Vec<CompletedTransaction>> {
            self.completions_rx
                .lock()
                .unwrap()
                .take()
                .expect("completions consumed twice")
        }
    }

    struct MockValidator {
        response_json: Mutex<String>,
        fail: Mutex<bool>,
        secrets_seen: Mutex<Vec<String>>,
    }

    impl MockValidator {
        fn new(response_json: &str) -> Self {
            Self {
                response_json: Mutex::new(response_json.to_string()),
                fail: Mutex::new(false),
                secrets_seen: Mutex::new(Vec::new()),
            }
        }

        fn empty() -> Self {
            Self::new(r#"{ "receipt": {} }"#)
        }

        fn set_response(&self, response_json: &str) {
            *self.response_json.lock().unwrap() = response_json.to_string();
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl ReceiptValidator for MockValidator {
        async fn verify(
            &self,
            _receipt_blob: &[u8],
            shared_secret: &str,
        ) -> Result<ValidateResponse, LedgerError> {
            self.secrets_seen
                .lock()
                .unwrap()
                .push(shared_secret.to_string());
            if *self.fail.lock().unwrap() {
                return Err(LedgerError::Validation("status 21003".to_string()));
            }
            parse_validate_response(self.response_json.lock().unwrap().as_bytes())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl SecureStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
            Ok(self.records.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), LedgerError> {
            self.records
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn remove_all(&self) -> Result<(), LedgerError> {
            self.records.lock().unwrap().clear();
            Ok(())
        }
    }

    struct FixedCatalog {
        known: Vec<Product>,
    }

    #[async_trait]
    impl CatalogProvider for FixedCatalog {
        async fn fetch(&self, identifiers: &[String]) -> Result<Vec<Product>, LedgerError> {
            Ok(self
                .known
                .iter()
                .filter(|p| identifiers.contains(&p.identifier))
                .cloned()
                .collect())
        }
    }

    // ---- harness ------------------------------------------------------

    struct Harness {
        ledger: Ledger,
        store: Arc<MockStore>,
        validator: Arc<MockValidator>,
        secure: Arc<MemoryStore>,
        clock: MockClock,
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn make_harness(skip_validation: bool, known_products: Vec<Product>) -> Harness {
        make_harness_with_secure(skip_validation, known_products, Arc::new(MemoryStore::default()))
    }

    fn make_harness_with_secure(
        skip_validation: bool,
        known_products: Vec<Product>,
        secure: Arc<MemoryStore>,
    ) -> Harness {
        let store = Arc::new(MockStore::new());
        let validator = Arc::new(MockValidator::empty());
        let clock = MockClock::new(base_time());
        let config = LedgerConfig {
            skip_validation,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_secure_store(
            config,
            store.clone(),
            validator.clone(),
            secure.clone(),
            Arc::new(FixedCatalog {
                known: known_products,
            }),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Harness {
            ledger,
            store,
            validator,
            secure,
            clock,
        }
    }

    const SUB_RESPONSE: &str = r#"{
        "receipt": {
            "receipt_creation_date_ms": "1736942400000",
            "in_app": [
                { "product_id": "com.example.sub", "expires_date_ms": "1739620800000" }
            ]
        }
    }"#;

    // ---- scenarios ----------------------------------------------------

    #[test]
    fn new_builds_the_default_file_store_from_the_namespace() {
        let config = LedgerConfig {
            storage_namespace: "ledgerkit-test",
            ..LedgerConfig::default()
        };
        let ledger = Ledger::new(
            config,
            Arc::new(MockStore::new()),
            Arc::new(MockValidator::empty()),
            Arc::new(FixedCatalog { known: vec![] }),
            Arc::new(MockClock::new(base_time())),
        );
        assert!(ledger.is_ok());
    }

    #[tokio::test]
    async fn empty_receipt_grants_nothing() {
        let h = make_harness(false, vec![]);
        assert!(!h.ledger.is_entitled("x"));
        assert!(!h.ledger.has_any_entitlement());
        assert!(!h.ledger.has_any_active_subscription());
    }

    #[tokio::test]
    async fn one_time_record_is_entitled_but_not_a_subscription() {
        let h = make_harness(false, vec![]);
        h.validator.set_response(
            r#"{ "receipt": { "in_app": [ { "product_id": "x" } ] } }"#,
        );
        h.ledger.start("secret").await;

        assert!(h.ledger.is_entitled("x"));
        assert!(h.ledger.has_any_entitlement());
        assert!(!h.ledger.has_any_active_subscription());
    }

    #[tokio::test]
    async fn stale_validator_data_never_regresses_expiration() {
        let h = make_harness(false, vec![]);
        h.ledger.start("secret").await;

        h.validator.set_response(
            r#"{ "receipt": { "in_app": [
                { "product_id": "y", "expires_date_ms": "1736943400000" }
            ] } }"#,
        );
        h.ledger.refresh_receipt().await.unwrap();

        // Re-ordered/stale data with an earlier expiration
        h.validator.set_response(
            r#"{ "receipt": { "in_app": [
                { "product_id": "y", "expires_date_ms": "1736942900000" }
            ] } }"#,
        );
        h.ledger.refresh_receipt().await.unwrap();

        let record = h.ledger.entitlement("y").unwrap();
        assert_eq!(record.expires_at.timestamp_millis(), 1_736_943_400_000);
    }

    #[tokio::test]
    async fn subscription_expiring_exactly_now_is_not_active() {
        let h = make_harness(false, vec![]);
        h.ledger.start("secret").await;
        // 1736942400000 ms == the mock clock's current instant
        h.validator.set_response(
            r#"{ "receipt": { "in_app": [
                { "product_id": "y", "expires_date_ms": "1736942400000" }
            ] } }"#,
        );
        h.ledger.refresh_receipt().await.unwrap();

        assert!(!h.ledger.is_entitled("y"));
        assert!(!h.ledger.has_any_active_subscription());

        h.clock.advance(chrono::Duration::milliseconds(-1));
        assert!(h.ledger.is_entitled("y"));
        assert!(h.ledger.has_any_active_subscription());
    }

    #[tokio::test]
    async fn unknown_identifier_fails_without_contacting_store() {
        let h = make_harness(false, vec![]);
        h.ledger.start("secret").await;

        let result = h.ledger.purchase_product("unknown-id").await;
        assert!(matches!(
            result,
            Err(LedgerError::NoProduct { identifier }) if identifier == "unknown-id"
        ));
        assert!(h.store.purchases().is_empty());
    }

    #[tokio::test]
    async fn cancelled_payment_completes_without_entitlement_or_event() {
        let h = make_harness(false, vec![make_product("com.example.pro", None)]);
        h.ledger.start("secret").await;
        h.store.fail_purchases_with(StoreErrorCode::PaymentCancelled);
        let mut purchases = h.ledger.subscribe_purchases();

        let outcome = h.ledger.purchase_product("com.example.pro").await.unwrap();
        assert!(outcome.entitlement.is_none());
        assert!(purchases.try_next().is_none());
        assert!(h.store.acknowledged().is_empty());
    }

    #[tokio::test]
    async fn other_store_errors_surface_verbatim() {
        let h = make_harness(false, vec![make_product("com.example.pro", None)]);
        h.ledger.start("secret").await;
        h.store.fail_purchases_with(StoreErrorCode::PaymentNotAllowed);

        let result = h.ledger.purchase_product("com.example.pro").await;
        assert!(matches!(
            result,
            Err(LedgerError::Store(StoreErrorCode::PaymentNotAllowed))
        ));
    }

    #[tokio::test]
    async fn unknown_store_error_reports_success_and_refreshes() {
        let h = make_harness(false, vec![make_product("com.example.pro", None)]);
        h.ledger.start("secret").await;
        h.store.fail_purchases_with(StoreErrorCode::Unknown);
        let mut receipts = h.ledger.subscribe_receipt_updates();
        let _ = receipts.try_next(); // drain the replayed start() receipt

        let outcome = h.ledger.purchase_product("com.example.pro").await.unwrap();
        assert!(outcome.entitlement.is_none());

        // The fire-and-forget refresh publishes a receipt update
        assert!(receipts.next().await.is_some());
    }

    #[tokio::test]
    async fn successful_purchase_validates_acknowledges_then_publishes() {
        let h = make_harness(
            false,
            vec![make_product(
                "com.example.sub",
                Some(SubscriptionPeriod::Month(1)),
            )],
        );
        h.ledger.start("secret").await;
        h.validator.set_response(SUB_RESPONSE);
        let mut purchases = h.ledger.subscribe_purchases();

        let outcome = h.ledger.purchase_product("com.example.sub").await.unwrap();

        let entitlement = outcome.entitlement.unwrap();
        assert_eq!(entitlement.kind, EntitlementKind::Recurring);
        assert_eq!(h.store.acknowledged(), vec!["tx-1"]);

        // Subscribers only see the event once queries can confirm it
        let event = purchases.next().await.unwrap();
        assert_eq!(event.identifier, "com.example.sub");
        assert!(h.ledger.is_entitled("com.example.sub"));
    }

    #[tokio::test]
    async fn failed_validation_leaves_receipt_untouched_and_unacknowledged() {
        let h = make_harness(
            false,
            vec![make_product(
                "com.example.sub",
                Some(SubscriptionPeriod::Month(1)),
            )],
        );
        h.ledger.start("secret").await;
        let before = h.ledger.receipt();
        h.validator.set_failing(true);

        let result = h.ledger.purchase_product("com.example.sub").await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(h.ledger.receipt(), before);
        assert!(h.store.acknowledged().is_empty());
    }

    #[tokio::test]
    async fn skip_validation_refresh_is_idempotent() {
        let h = make_harness(true, vec![]);
        h.ledger.start("whatever").await;
        let mut receipts = h.ledger.subscribe_receipt_updates();
        let _ = receipts.try_next(); // drain replay

        let first = h.ledger.refresh_receipt().await.unwrap();
        let second = h.ledger.refresh_receipt().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(receipts.try_next().unwrap(), first);
        assert_eq!(receipts.try_next().unwrap(), second);
        assert!(receipts.try_next().is_none());
    }

    #[tokio::test]
    async fn skip_validation_purchase_synthesizes_entitlement() {
        let h = make_harness(
            true,
            vec![make_product(
                "com.example.sub",
                Some(SubscriptionPeriod::Week(1)),
            )],
        );
        h.ledger.start("whatever").await;

        let outcome = h.ledger.purchase_product("com.example.sub").await.unwrap();
        let entitlement = outcome.entitlement.unwrap();
        assert_eq!(entitlement.kind, EntitlementKind::Recurring);
        assert_eq!(
            entitlement.expires_at,
            base_time() + chrono::Duration::days(7)
        );
        assert!(h.ledger.has_any_active_subscription());
        assert_eq!(h.store.acknowledged(), vec!["tx-1"]);
    }

    #[tokio::test]
    async fn completed_transactions_synthesize_acknowledge_and_publish() {
        let h = make_harness(true, vec![make_product("com.example.pro", None)]);
        h.ledger.start("whatever").await;
        let mut purchases = h.ledger.subscribe_purchases();

        h.ledger
            .handle_completed_transactions(vec![CompletedTransaction {
                product_id: "com.example.pro".to_string(),
                transaction_id: "restored-1".to_string(),
                needs_acknowledgement: true,
            }])
            .await;

        assert!(h.ledger.is_entitled("com.example.pro"));
        assert_eq!(h.store.acknowledged(), vec!["restored-1"]);
        let event = purchases.next().await.unwrap();
        assert_eq!(event.identifier, "com.example.pro");
    }

    #[tokio::test]
    async fn transactions_are_not_acknowledged_when_validation_fails() {
        let h = make_harness(false, vec![]);
        h.ledger.start("secret").await;
        h.validator.set_failing(true);

        h.ledger
            .handle_completed_transactions(vec![CompletedTransaction {
                product_id: "com.example.pro".to_string(),
                transaction_id: "tx-9".to_string(),
                needs_acknowledgement: true,
            }])
            .await;

        assert!(h.store.acknowledged().is_empty());
    }

    #[tokio::test]
    async fn completions_channel_drives_reconciliation() {
        let h = make_harness(true, vec![make_product("com.example.pro", None)]);
        h.ledger.start("whatever").await;

        h.store
            .completions_tx
            .send(vec![CompletedTransaction {
                product_id: "com.example.pro".to_string(),
                transaction_id: "bg-1".to_string(),
                needs_acknowledgement: true,
            }])
            .unwrap();

        // The spawned listener picks the batch up asynchronously
        for _ in 0..100 {
            if h.ledger.is_entitled("com.example.pro") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(h.ledger.is_entitled("com.example.pro"));
    }

    #[tokio::test]
    async fn receipt_survives_cold_start() {
        let secure = Arc::new(MemoryStore::default());
        {
            let h = make_harness_with_secure(true, vec![make_product("com.example.pro", None)], secure.clone());
            h.ledger.start("whatever").await;
            h.ledger.purchase_product("com.example.pro").await.unwrap();
        }

        let h = make_harness_with_secure(true, vec![], secure);
        assert!(h.ledger.is_entitled("com.example.pro"));
    }

    #[tokio::test]
    async fn undecodable_persisted_blob_degrades_to_empty_receipt() {
        let secure = Arc::new(MemoryStore::default());
        secure.set(RECEIPT_KEY, b"garbage").unwrap();

        let h = make_harness_with_secure(false, vec![], secure);
        assert!(!h.ledger.has_any_entitlement());
    }

    #[tokio::test]
    async fn remove_cached_receipt_resets_state_and_store() {
        let h = make_harness(true, vec![make_product("com.example.pro", None)]);
        h.ledger.start("whatever").await;
        h.ledger.purchase_product("com.example.pro").await.unwrap();
        assert!(h.secure.get(RECEIPT_KEY).unwrap().is_some());

        let mut receipts = h.ledger.subscribe_receipt_updates();
        let _ = receipts.try_next(); // drain replay
        h.ledger.remove_cached_receipt();

        assert!(!h.ledger.has_any_entitlement());
        assert!(h.secure.get(RECEIPT_KEY).unwrap().is_none());
        assert!(receipts.try_next().unwrap().is_empty());
    }

    #[tokio::test]
    async fn receipt_updates_replay_latest_to_new_subscribers() {
        let h = make_harness(true, vec![make_product("com.example.pro", None)]);
        h.ledger.start("whatever").await;
        h.ledger.purchase_product("com.example.pro").await.unwrap();

        // Subscribed after the fact, still sees the latest receipt
        let mut receipts = h.ledger.subscribe_receipt_updates();
        let replayed = receipts.next().await.unwrap();
        assert!(replayed.entitlement("com.example.pro").is_some());
    }

    #[tokio::test]
    async fn validator_receives_the_shared_secret() {
        let h = make_harness(false, vec![]);
        h.ledger.start("s3cret").await;
        assert_eq!(
            h.validator.secrets_seen.lock().unwrap().as_slice(),
            ["s3cret"]
        );
    }

    #[tokio::test]
    #[should_panic(expected = "refresh_receipt called before start")]
    async fn refresh_before_start_panics_when_validation_is_on() {
        let h = make_harness(false, vec![]);
        let _ = h.ledger.refresh_receipt().await;
    }
}
