//! [`BillingEvent`] definitions.

#[cfg(doc)]
use common::DateTime;
use common::{define_kind, unit, BasisPoints, Cents, DateTimeOf};

use crate::domain::{merchant, session};
#[cfg(doc)]
use crate::domain::Session;

/// Immutable record of the platform's commission for a single [`Session`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BillingEvent {
    /// ID of the [`Session`] this [`BillingEvent`] is issued for.
    pub session_id: session::Id,

    /// ID of the billed merchant.
    pub merchant_id: merchant::Id,

    /// Resolved order total.
    pub order_total: Cents,

    /// Fee rate applied to the [`order_total`].
    ///
    /// [`order_total`]: BillingEvent::order_total
    pub fee_rate: BasisPoints,

    /// Billable amount of the platform's commission.
    pub billable: Cents,

    /// [`TotalSource`] the [`order_total`] was resolved from.
    ///
    /// [`order_total`]: BillingEvent::order_total
    pub total_source: TotalSource,

    /// [`DateTime`] when this [`BillingEvent`] was created.
    pub created_at: CreationDateTime,
}

define_kind! {
    #[doc = "Source an order total is resolved from."]
    enum TotalSource {
        #[doc = "Verified by the point of sale."]
        Pos = 1,

        #[doc = "Reported by the merchant on confirmation."]
        MerchantReported = 2,

        #[doc = "Estimated by the driver."]
        DriverReported = 3,
    }
}

/// Candidate order totals known at the moment of a settlement.
#[derive(Clone, Copy, Debug, Default)]
pub struct Totals {
    /// Total verified by the point of sale.
    pub pos: Option<Cents>,

    /// Total reported by the merchant.
    pub merchant_reported: Option<Cents>,

    /// Total estimated by the driver.
    pub driver_reported: Option<Cents>,
}

impl Totals {
    /// Resolves the order total following the provider-of-record
    /// precedence: point of sale, then merchant, then driver.
    ///
    /// Zero totals are not billable and are skipped.
    #[must_use]
    pub fn resolve(self) -> Option<(Cents, TotalSource)> {
        [
            (self.pos, TotalSource::Pos),
            (self.merchant_reported, TotalSource::MerchantReported),
            (self.driver_reported, TotalSource::DriverReported),
        ]
        .into_iter()
        .find_map(|(total, source)| {
            total.filter(|t| *t > Cents::ZERO).map(|t| (t, source))
        })
    }
}

/// Policy of computing the platform's fee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FeePolicy {
    /// Fee rate applied to an order total.
    pub rate: BasisPoints,

    /// Minimum billable amount.
    pub min: Cents,

    /// Maximum billable amount.
    pub max: Cents,
}

impl FeePolicy {
    /// Computes the billable fee for the provided order `total`.
    #[must_use]
    pub fn fee(&self, total: Cents) -> Cents {
        total.share(self.rate).clamp_to(self.min, self.max)
    }
}

/// [`DateTime`] of a [`BillingEvent`] creation.
pub type CreationDateTime = DateTimeOf<(BillingEvent, unit::Creation)>;

#[cfg(test)]
mod spec {
    use common::{BasisPoints, Cents};
    use rstest::rstest;

    use super::{FeePolicy, TotalSource, Totals};

    fn policy() -> FeePolicy {
        FeePolicy {
            rate: BasisPoints::new(500).unwrap(),
            min: Cents::new(50),
            max: Cents::new(500),
        }
    }

    #[rstest]
    #[case::floor(50, 50)]
    #[case::unclamped(3_000, 150)]
    #[case::ceiling(20_000, 500)]
    #[case::far_above(1_000_000, 500)]
    fn fee_is_clamped_into_band(#[case] total: u64, #[case] fee: u64) {
        assert_eq!(policy().fee(Cents::new(total)), Cents::new(fee));
    }

    #[test]
    fn pos_total_takes_precedence() {
        let totals = Totals {
            pos: Some(Cents::new(2_600)),
            merchant_reported: Some(Cents::new(3_000)),
            driver_reported: Some(Cents::new(2_500)),
        };

        assert_eq!(
            totals.resolve(),
            Some((Cents::new(2_600), TotalSource::Pos)),
        );
    }

    #[test]
    fn merchant_total_beats_driver_estimate() {
        let totals = Totals {
            pos: None,
            merchant_reported: Some(Cents::new(3_000)),
            driver_reported: Some(Cents::new(2_500)),
        };

        assert_eq!(
            totals.resolve(),
            Some((Cents::new(3_000), TotalSource::MerchantReported)),
        );
    }

    #[test]
    fn falls_back_to_driver_estimate() {
        let totals = Totals {
            driver_reported: Some(Cents::new(2_500)),
            ..Totals::default()
        };

        assert_eq!(
            totals.resolve(),
            Some((Cents::new(2_500), TotalSource::DriverReported)),
        );
    }

    #[test]
    fn nothing_to_resolve() {
        assert_eq!(Totals::default().resolve(), None);
        assert_eq!(
            Totals {
                merchant_reported: Some(Cents::ZERO),
                ..Totals::default()
            }
            .resolve(),
            None,
        );
    }

    #[test]
    fn displays_stable_source_codes() {
        assert_eq!(TotalSource::Pos.code(), "pos");
        assert_eq!(TotalSource::MerchantReported.code(), "merchant_reported");
        assert_eq!(TotalSource::DriverReported.code(), "driver_reported");
    }
}
