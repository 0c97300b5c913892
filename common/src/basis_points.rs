//! [`BasisPoints`]-related definitions.

use std::str::FromStr;

use derive_more::{Display, Into};

/// Rate expressed in hundredths of a percent.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Into, PartialEq)]
#[display("{_0}bps")]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct BasisPoints(u16);

impl BasisPoints {
    /// Number of [`BasisPoints`] making up the whole.
    pub const WHOLE: u16 = 10_000;

    /// Creates new [`BasisPoints`] by checking the provided value doesn't
    /// exceed the [`WHOLE`].
    ///
    /// [`WHOLE`]: Self::WHOLE
    #[must_use]
    pub const fn new(val: u16) -> Option<Self> {
        if val > Self::WHOLE {
            None
        } else {
            Some(Self(val))
        }
    }

    /// Returns the raw value of these [`BasisPoints`].
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for BasisPoints {
    type Error = &'static str;

    fn try_from(val: u16) -> Result<Self, Self::Error> {
        Self::new(val).ok_or("basis points cannot exceed 10000")
    }
}

impl FromStr for BasisPoints {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u16>()
            .ok()
            .and_then(Self::new)
            .ok_or("invalid basis points value")
    }
}

#[cfg(test)]
mod spec {
    use super::BasisPoints;

    #[test]
    fn bounded_by_whole() {
        assert!(BasisPoints::new(0).is_some());
        assert!(BasisPoints::new(10_000).is_some());
        assert!(BasisPoints::new(10_001).is_none());
        assert!("10001".parse::<BasisPoints>().is_err());
        assert_eq!("500".parse::<BasisPoints>().unwrap().get(), 500);
    }
}
