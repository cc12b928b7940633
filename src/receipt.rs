//! Receipt and entitlement records.
//!
//! A [`Receipt`] is the durable, authoritative answer to "what has this
//! user paid for and until when". It is replaced wholesale on every
//! successful reconciliation; readers never observe a partial update.

use crate::clock::Clock;
use crate::product::Product;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expiration sentinel for one-time purchases: effectively never.
pub static DISTANT_FUTURE: Lazy<DateTime<Utc>> = Lazy::new(|| {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .expect("sentinel timestamp is unambiguous")
});

/// Kind of purchase an entitlement was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementKind {
    /// Non-consumable purchase, owned forever.
    OneTime,
    /// Auto-renewing subscription with a real expiration.
    Recurring,
}

/// A single reconciled purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Product identifier this entitlement was purchased under.
    pub identifier: String,

    /// Whether the purchase was one-time or recurring.
    pub kind: EntitlementKind,

    /// When the entitlement lapses. One-time purchases carry the
    /// [`DISTANT_FUTURE`] sentinel.
    pub expires_at: DateTime<Utc>,

    /// Purchased quantity, at least 1.
    pub quantity: u32,
}

impl Entitlement {
    /// A one-time entitlement that never expires.
    pub fn one_time(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: EntitlementKind::OneTime,
            expires_at: *DISTANT_FUTURE,
            quantity: 1,
        }
    }

    /// A recurring entitlement expiring at the given instant.
    pub fn recurring(identifier: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: EntitlementKind::Recurring,
            expires_at,
            quantity: 1,
        }
    }

    /// Synthesize an entitlement from catalog metadata without a validator
    /// round-trip (sandbox path).
    ///
    /// Subscription products expire one billing period from `now`; products
    /// without a period, or with an [`Unknown`] one, become one-time.
    ///
    /// [`Unknown`]: crate::SubscriptionPeriod::Unknown
    pub fn from_product(product: &Product, clock: &dyn Clock) -> Self {
        match product.subscription_period.and_then(|p| p.duration()) {
            Some(duration) => Self::recurring(&product.identifier, clock.now_utc() + duration),
            None => Self::one_time(&product.identifier),
        }
    }

    /// Whether the entitlement grants access at `now`.
    ///
    /// One-time purchases are always active; recurring ones only strictly
    /// before their expiration. An expiration exactly equal to `now` is
    /// not active.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            EntitlementKind::OneTime => true,
            EntitlementKind::Recurring => self.expires_at > now,
        }
    }
}

/// Server-reconciled view of all purchases, keyed by product identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// When the validator produced the underlying receipt data.
    pub created_at: DateTime<Utc>,

    /// At most one record per product identifier.
    pub entitlements: HashMap<String, Entitlement>,
}

impl Receipt {
    /// An empty receipt created at the given instant.
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            entitlements: HashMap::new(),
        }
    }

    /// Look up the record for a product identifier.
    pub fn entitlement(&self, identifier: &str) -> Option<&Entitlement> {
        self.entitlements.get(identifier)
    }

    /// Whether no purchase has ever been reconciled.
    pub fn is_empty(&self) -> bool {
        self.entitlements.is_empty()
    }

    /// Fold a single record into the receipt under the monotonic rule.
    pub fn merge_entitlement(&mut self, entitlement: Entitlement) {
        match self.entitlements.get(&entitlement.identifier) {
            Some(existing) if existing.expires_at >= entitlement.expires_at => {}
            _ => {
                self.entitlements
                    .insert(entitlement.identifier.clone(), entitlement);
            }
        }
    }

    /// Merge new validator data into this receipt.
    ///
    /// Monotonic join: for every identifier the stored expiration never
    /// regresses, even when the validator returns stale or re-ordered
    /// data. Identifiers absent from the new data are retained. The
    /// creation timestamp follows the new data.
    pub fn merged_with(&self, new: Receipt) -> Receipt {
        let mut result = Receipt {
            created_at: new.created_at,
            entitlements: self.entitlements.clone(),
        };
        for (_, entitlement) in new.entitlements {
            result.merge_entitlement(entitlement);
        }
        result
    }
}
