//! [`Cents`]-related definitions.

use std::{fmt, str::FromStr};

use derive_more::{From, Into};

use crate::BasisPoints;

/// Amount of money in minor currency units.
#[derive(
    Clone, Copy, Debug, Default, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd,
)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Cents(u64);

impl Cents {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates new [`Cents`] out of the provided amount of minor units.
    #[must_use]
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Returns the amount of minor units.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Calculates the share of these [`Cents`] according to the provided
    /// [`BasisPoints`] rate, rounding down to a whole cent.
    #[must_use]
    pub fn share(self, rate: BasisPoints) -> Self {
        let share = u128::from(self.0) * u128::from(rate.get())
            / u128::from(BasisPoints::WHOLE);
        // Never larger than `self.0`, because rate is bounded by the whole.
        Self(u64::try_from(share).unwrap_or(u64::MAX))
    }

    /// Restricts these [`Cents`] to the provided inclusive band.
    #[must_use]
    pub fn clamp_to(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0.max(min.0)))
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Cents {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self).map_err(|_| "invalid amount of cents")
    }
}
