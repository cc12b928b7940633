//! Catalog item metadata fetched from the store.

use crate::period::SubscriptionPeriod;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Payment mode of an introductory offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Discounted price charged each period of the offer.
    PayAsYouGo,
    /// Discounted price charged once up front.
    PayUpFront,
    /// No charge for the duration of the offer.
    FreeTrial,
}

/// Introductory offer terms attached to a subscription product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroductoryOffer {
    /// Localized price string for the offer.
    pub price: String,

    /// Length of the offer.
    pub period: SubscriptionPeriod,

    /// How the offer is charged.
    pub payment_mode: PaymentMode,
}

impl fmt::Display for IntroductoryOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] with period {}", self.price, self.period)
    }
}

/// Immutable catalog metadata for a purchasable product.
///
/// Equality and hashing consider the identifier only; two fetches of the
/// same product with different localized pricing compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Store product identifier, the unique key.
    pub identifier: String,

    /// Localized display title.
    pub title: String,

    /// Localized description.
    pub description: String,

    /// Localized price string, if the store provided one.
    pub price: Option<String>,

    /// Raw decimal price in the store locale's currency.
    pub raw_price: Decimal,

    /// BCP 47 locale tag the price is localized for.
    pub locale: String,

    /// Billing period for subscription products; `None` for one-time
    /// purchases.
    pub subscription_period: Option<SubscriptionPeriod>,

    /// Introductory offer terms, if any.
    pub introductory_offer: Option<IntroductoryOffer>,
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Product {}

impl Hash for Product {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}
