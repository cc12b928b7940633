//! # Ledgerkit
//!
//! **Client-side purchase entitlement reconciliation for Rust.**
//!
//! Ledgerkit maintains an authoritative, crash-durable view of "what has
//! this user paid for and until when" by merging raw transaction
//! completions from the payment store with server-validated receipt data,
//! deduplicating subscription renewals by latest expiration, and
//! persisting the merged result.
//!
//! ## Features
//!
//! - **Monotonic reconciliation** — a recorded expiration never regresses,
//!   even when the validator returns stale or re-ordered data
//! - **Durable receipts** — every merge is persisted best-effort to a
//!   secure store and reloaded on cold start
//! - **Acknowledge-after-merge ordering** — transactions are acknowledged
//!   to the store only once their effect is durably recorded, so a crash
//!   never silently loses an entitlement
//! - **Coalesced catalog fetches** — uncached product identifiers go out
//!   in one batched request, with a capacity-bounded in-memory cache
//! - **Push notifications** — typed event channels for receipt updates,
//!   purchase completions, and catalog fetches; the receipt channel
//!   replays its latest value to new subscribers
//! - **Sandbox synthesis** — offline builds can grant entitlements by
//!   local synthesis instead of a validator round-trip
//!
//! ## Quickstart
//!
//! ```no_run
//! use ledgerkit::{Ledger, LedgerConfig, SystemClock};
//! use std::sync::Arc;
//!
//! # use ledgerkit::{CatalogProvider, ReceiptValidator, Store};
//! # async fn example(
//! #     store: Arc<dyn Store>,
//! #     validator: Arc<dyn ReceiptValidator>,
//! #     catalog: Arc<dyn CatalogProvider>,
//! # ) -> Result<(), ledgerkit::LedgerError> {
//! let config = LedgerConfig {
//!     storage_namespace: "myapp",
//!     ..LedgerConfig::default()
//! };
//! let ledger = Ledger::new(
//!     config,
//!     store,
//!     validator,
//!     catalog,
//!     Arc::new(SystemClock),
//! )?;
//!
//! ledger.start("shared-secret").await;
//!
//! if ledger.is_entitled("com.example.pro") {
//!     println!("pro features unlocked");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Trust Model
//!
//! Ledgerkit never inspects the opaque receipt blob itself; authenticity
//! is the injected validator backend's job. Entitlement queries fail
//! closed: absence of validated data is indistinguishable from "not
//! purchased". The one deliberate exception is the sandbox synthesis path
//! (`skip_validation`), which grants entitlements on local trust alone.

#![deny(warnings)]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/ledgerkit/0.1.0")]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Data model
pub mod period;
pub mod product;
pub mod receipt;

// Protocol layer
pub mod protocol;

// Collaborator interfaces
pub mod keystore;
pub mod store;
pub mod validator;

// Catalog layer
pub mod catalog;

// Event fabric
pub mod events;

// Engine (main public API)
pub mod ledger;

mod state;

// Re-exports for public API
pub use catalog::CatalogProvider;
pub use clock::{Clock, SystemClock};
pub use config::LedgerConfig;
pub use errors::LedgerError;
pub use events::EventStream;
pub use keystore::{FileStore, SecureStore};
pub use ledger::{Ledger, PurchaseOutcome};
pub use period::SubscriptionPeriod;
pub use product::{IntroductoryOffer, PaymentMode, Product};
pub use receipt::{Entitlement, EntitlementKind, Receipt};
pub use store::{CompletedTransaction, PurchaseDetails, Store, StoreErrorCode};
pub use validator::ReceiptValidator;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
