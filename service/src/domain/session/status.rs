//! [`Status`] state machine of a [`Session`].

use common::define_kind;
use derive_more::{Display, Error};

#[cfg(doc)]
use super::Session;

define_kind! {
    #[doc = "Lifecycle status of a [`Session`]."]
    enum Status {
        #[doc = "Waiting for an anonymous [`Session`] to be paired with a driver."]
        PendingPairing = 1,

        #[doc = "Waiting for an order to be bound before the arrival verification."]
        PendingOrder = 2,

        #[doc = "Waiting for the driver's arrival to be verified."]
        PendingVerification = 3,

        #[doc = "Driver's arrival is verified."]
        Verified = 4,

        #[doc = "One-time arrival code is issued."]
        CodeGenerated = 5,

        #[doc = "One-time arrival code is redeemed at the merchant."]
        CodeRedeemed = 6,

        #[doc = "Merchant confirmed the fulfillment."]
        MerchantConfirmed = 7,

        #[doc = "Completed with a billing event issued."]
        Completed = 8,

        #[doc = "Completed without any billable total."]
        CompletedUnbillable = 9,

        #[doc = "Time-to-live has lapsed before completion."]
        Expired = 10,

        #[doc = "Explicitly canceled."]
        Canceled = 11,
    }
}

impl Status {
    /// [`Status`]es the [`Session`] may leave.
    pub const NON_TERMINAL: &'static [Self] = &[
        Self::PendingPairing,
        Self::PendingOrder,
        Self::PendingVerification,
        Self::Verified,
        Self::CodeGenerated,
        Self::CodeRedeemed,
        Self::MerchantConfirmed,
    ];

    /// Indicates whether this [`Status`] is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::CompletedUnbillable
                | Self::Expired
                | Self::Canceled,
        )
    }

    /// Indicates whether the arrival has been verified by the time this
    /// [`Status`] is reached on the forward path.
    #[must_use]
    pub const fn is_past_verification(self) -> bool {
        matches!(
            self,
            Self::Verified
                | Self::CodeGenerated
                | Self::CodeRedeemed
                | Self::MerchantConfirmed
                | Self::Completed
                | Self::CompletedUnbillable,
        )
    }

    /// Indicates whether the arrival code has been redeemed by the time this
    /// [`Status`] is reached on the forward path.
    #[must_use]
    pub const fn is_past_redemption(self) -> bool {
        matches!(
            self,
            Self::CodeRedeemed
                | Self::MerchantConfirmed
                | Self::Completed
                | Self::CompletedUnbillable,
        )
    }

    /// Position of this [`Status`] on the forward path.
    ///
    /// [`None`] for the side exits, which are reachable from anywhere.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::PendingPairing => Some(0),
            Self::PendingOrder => Some(1),
            Self::PendingVerification => Some(2),
            Self::Verified => Some(3),
            Self::CodeGenerated => Some(4),
            Self::CodeRedeemed => Some(5),
            Self::MerchantConfirmed => Some(6),
            Self::Completed | Self::CompletedUnbillable => Some(7),
            Self::Expired | Self::Canceled => None,
        }
    }

    /// Checks whether moving from this [`Status`] into the `next` one keeps
    /// the lifecycle monotonic.
    #[must_use]
    pub fn can_move_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => false,
        }
    }
}

/// Error of a guarded [`Status`] transition.
#[derive(Clone, Copy, Debug, Display, Error)]
#[display("cannot move `Session` from `{from}` to `{to}`")]
pub struct InvalidTransition {
    /// [`Status`] the transition was attempted from.
    pub from: Status,

    /// [`Status`] the transition was attempted into.
    pub to: Status,
}

#[cfg(test)]
mod spec {
    use super::Status;

    #[test]
    fn terminal_statuses_are_final() {
        for from in [
            Status::Completed,
            Status::CompletedUnbillable,
            Status::Expired,
            Status::Canceled,
        ] {
            for to in Status::ALL {
                assert!(!from.can_move_to(*to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn side_exits_reachable_from_any_non_terminal() {
        for from in Status::NON_TERMINAL {
            assert!(from.can_move_to(Status::Expired));
            assert!(from.can_move_to(Status::Canceled));
        }
    }

    #[test]
    fn forward_path_is_monotonic() {
        assert!(Status::PendingPairing.can_move_to(Status::PendingVerification));
        assert!(Status::PendingOrder.can_move_to(Status::PendingVerification));
        assert!(Status::Verified.can_move_to(Status::CodeGenerated));
        assert!(Status::CodeGenerated.can_move_to(Status::CodeGenerated));
        assert!(Status::MerchantConfirmed.can_move_to(Status::Completed));

        assert!(!Status::Verified.can_move_to(Status::PendingVerification));
        assert!(!Status::CodeRedeemed.can_move_to(Status::CodeGenerated));
        assert!(!Status::PendingVerification.can_move_to(Status::PendingPairing));
    }

    #[test]
    fn displays_stable_codes() {
        assert_eq!(Status::PendingPairing.to_string(), "pending_pairing");
        assert_eq!(Status::CompletedUnbillable.code(), "completed_unbillable");
        assert_eq!("code_redeemed".parse::<Status>().unwrap(), Status::CodeRedeemed);
    }
}
