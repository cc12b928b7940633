//! Subscription billing period value type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A subscription billing period.
///
/// Periods are totally ordered by normalized day count using the
/// approximations week = 7 days, month = 30 days, year = 365 days, with
/// ties between different units of equal length (7 days vs 1 week)
/// broken toward the smaller unit. The approximation is fine for ranking
/// offers against each other; it is not calendar arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPeriod {
    /// A period of `n` days.
    Day(u32),
    /// A period of `n` weeks.
    Week(u32),
    /// A period of `n` months.
    Month(u32),
    /// A period of `n` years.
    Year(u32),
    /// A period the store could not express. Carries no unit count and is
    /// excluded from duration math.
    Unknown,
}

impl SubscriptionPeriod {
    /// Approximate length in days, or `None` for [`Unknown`].
    ///
    /// [`Unknown`]: SubscriptionPeriod::Unknown
    pub fn day_count(&self) -> Option<i64> {
        match *self {
            Self::Day(count) => Some(i64::from(count)),
            Self::Week(count) => Some(i64::from(count) * 7),
            Self::Month(count) => Some(i64::from(count) * 30),
            Self::Year(count) => Some(i64::from(count) * 365),
            Self::Unknown => None,
        }
    }

    /// Number of units in the period, or `None` for [`Unknown`].
    ///
    /// [`Unknown`]: SubscriptionPeriod::Unknown
    pub fn units(&self) -> Option<u32> {
        match *self {
            Self::Day(count) | Self::Week(count) | Self::Month(count) | Self::Year(count) => {
                Some(count)
            }
            Self::Unknown => None,
        }
    }

    /// Approximate duration of the period, or `None` for [`Unknown`].
    ///
    /// [`Unknown`]: SubscriptionPeriod::Unknown
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.day_count().map(chrono::Duration::days)
    }

    /// Key used for ordering: day count, then unit granularity, then unit
    /// count, so distinct periods never compare equal. `Unknown` sorts
    /// below every sized period.
    fn ordering_key(&self) -> (i64, u8, u32) {
        let unit_rank = match *self {
            Self::Day(_) => 0,
            Self::Week(_) => 1,
            Self::Month(_) => 2,
            Self::Year(_) => 3,
            Self::Unknown => 4,
        };
        (
            self.day_count().unwrap_or(-1),
            unit_rank,
            self.units().unwrap_or(0),
        )
    }
}

impl Ord for SubscriptionPeriod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering_key().cmp(&other.ordering_key())
    }
}

impl PartialOrd for SubscriptionPeriod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SubscriptionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, count) = match *self {
            Self::Day(count) => ("day", count),
            Self::Week(count) => ("week", count),
            Self::Month(count) => ("month", count),
            Self::Year(count) => ("year", count),
            Self::Unknown => return write!(f, "N/A"),
        };
        if count == 1 {
            write!(f, "{} {}", count, unit)
        } else {
            write!(f, "{} {}s", count, unit)
        }
    }
}
