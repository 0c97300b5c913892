//! [`Session`] definitions.

pub mod code;
pub mod pairing;
pub mod status;

use std::time::Duration;

#[cfg(doc)]
use common::DateTime;
use common::{define_kind, unit, Cents, DateTimeOf};
use derive_more::{AsRef, Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{charger, driver, geo::Coordinates, merchant, order};

pub use self::{
    code::{ArrivalCode, PairingCode},
    pairing::Pairing,
    status::{InvalidTransition, Status},
};

/// Single attempt of a driver to charge a vehicle and visit a merchant.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    /// ID of this [`Session`].
    pub id: Id,

    /// Client-supplied [`IdempotencyKey`] this [`Session`] was created with.
    pub idempotency_key: Option<IdempotencyKey>,

    /// ID of the driver this [`Session`] belongs to.
    ///
    /// [`None`] until an anonymous [`Session`] is paired.
    pub driver_id: Option<driver::Id>,

    /// ID of the merchant the driver is going to visit.
    pub merchant_id: merchant::Id,

    /// ID of the charger the vehicle is plugged into.
    ///
    /// May be bound later by a QR scan.
    pub charger_id: Option<charger::Id>,

    /// [`Flow`] this [`Session`] was entered through.
    pub flow: Flow,

    /// [`Client`] this [`Session`] was started from.
    pub client: Client,

    /// Fingerprint of the vehicle, if reported.
    pub vehicle: Option<Vehicle>,

    /// Current [`Status`] of this [`Session`].
    pub status: Status,

    /// [`DateTime`] when this [`Session`] was created.
    pub created_at: CreationDateTime,

    /// [`DateTime`] when this [`Session`] expires unless completed.
    pub expires_at: ExpirationDateTime,

    /// [`Pairing`] state, present for anonymous entry flows only.
    pub pairing: Option<Pairing>,

    /// One-time [`ArrivalCode`] issued after the verification.
    pub arrival_code: Option<ArrivalCode>,

    /// [`DateTime`] when the [`ArrivalCode`] stops being redeemable.
    pub code_expires_at: Option<CodeExpirationDateTime>,

    /// Successful [`Verification`] of the driver's arrival.
    pub verification: Option<Verification>,

    /// Number of verification attempts made so far.
    pub verification_attempts: u8,

    /// Order bound to this [`Session`], if any.
    pub order: Option<OrderBinding>,

    /// [`DateTime`] when the [`ArrivalCode`] was redeemed.
    pub redeemed_at: Option<RedemptionDateTime>,

    /// [`DateTime`] when the merchant confirmed the fulfillment.
    pub merchant_confirmed_at: Option<ConfirmationDateTime>,

    /// Computed billable amount.
    pub billable: Option<Cents>,

    /// [`BillingStatus`] of this [`Session`].
    pub billing_status: BillingStatus,

    /// [`DateTime`] when this [`Session`] was canceled.
    pub canceled_at: Option<CancellationDateTime>,
}

impl Session {
    /// Creates a new [`Session`] entered through the provided [`Entry`] in
    /// the `initial` [`Status`], living for the provided `ttl`.
    #[must_use]
    pub fn new(entry: Entry, initial: Status, ttl: Duration) -> Self {
        let Entry {
            idempotency_key,
            driver_id,
            merchant_id,
            charger_id,
            flow,
            client,
            vehicle,
        } = entry;

        let created_at = CreationDateTime::now();
        Self {
            id: Id::new(),
            idempotency_key,
            driver_id,
            merchant_id,
            charger_id,
            flow,
            client,
            vehicle,
            status: initial,
            created_at,
            expires_at: (created_at + ttl).coerce(),
            pairing: None,
            arrival_code: None,
            code_expires_at: None,
            verification: None,
            verification_attempts: 0,
            order: None,
            redeemed_at: None,
            merchant_confirmed_at: None,
            billable: None,
            billing_status: BillingStatus::Pending,
            canceled_at: None,
        }
    }

    /// Indicates whether this [`Session`] has not reached a terminal
    /// [`Status`] yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Indicates whether this [`Session`] is still active, but its
    /// time-to-live has lapsed by the provided `now`.
    #[must_use]
    pub fn is_expired<Of: ?Sized>(&self, now: DateTimeOf<Of>) -> bool {
        self.is_active() && self.expires_at.has_passed(now)
    }

    /// Indicates whether the issued [`ArrivalCode`] is still redeemable at
    /// the provided `now`.
    #[must_use]
    pub fn has_live_code<Of: ?Sized>(&self, now: DateTimeOf<Of>) -> bool {
        self.arrival_code.is_some()
            && self.code_expires_at.is_some_and(|at| !at.has_passed(now))
    }

    /// Moves this [`Session`] into the `to` [`Status`], if its current one is
    /// among the `from` ones and the lifecycle stays monotonic.
    ///
    /// # Errors
    ///
    /// With an [`InvalidTransition`] if the move is not allowed. This
    /// [`Session`] is left untouched then.
    pub fn transition(
        &mut self,
        from: &[Status],
        to: Status,
    ) -> Result<(), InvalidTransition> {
        let current = self.status;
        if !from.contains(&current) || !current.can_move_to(to) {
            return Err(InvalidTransition { from: current, to });
        }
        self.status = to;
        Ok(())
    }

    /// Flips this [`Session`] into [`Status::Expired`].
    ///
    /// # Errors
    ///
    /// With an [`InvalidTransition`] if this [`Session`] is terminal already.
    pub fn expire(&mut self) -> Result<(), InvalidTransition> {
        self.transition(Status::NON_TERMINAL, Status::Expired)
    }

    /// Flips this [`Session`] into [`Status::Canceled`] at the provided `now`.
    ///
    /// # Errors
    ///
    /// With an [`InvalidTransition`] if this [`Session`] is terminal already.
    pub fn cancel(
        &mut self,
        now: CancellationDateTime,
    ) -> Result<(), InvalidTransition> {
        self.transition(Status::NON_TERMINAL, Status::Canceled)?;
        self.canceled_at = Some(now);
        Ok(())
    }
}

/// ID of a [`Session`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    FromStr,
    Hash,
    Into,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Client-supplied key making [`Session`] creation retries safe.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(str)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Maximum length of an [`IdempotencyKey`].
    const MAX_LEN: usize = 255;

    /// Creates a new [`IdempotencyKey`] if the given `key` is valid.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        Self::check(&key).then_some(Self(key))
    }

    /// Checks whether the given `key` is a valid [`IdempotencyKey`].
    fn check(key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        !key.is_empty()
            && key.len() <= Self::MAX_LEN
            && key.trim() == key
            && !key.chars().any(char::is_control)
    }
}

impl FromStr for IdempotencyKey {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `IdempotencyKey`")
    }
}

define_kind! {
    #[doc = "Entry flow of a [`Session`]."]
    enum Flow {
        #[doc = "In-vehicle browser shows a QR code scanned by a phone."]
        QrPairing = 1,

        #[doc = "Driver is onboarded by an SMS sent to the phone."]
        PhoneFirst = 2,

        #[doc = "Driver is authenticated already."]
        Authenticated = 3,
    }
}

impl Flow {
    /// Indicates whether a [`Session`] of this [`Flow`] starts anonymous and
    /// requires [`Pairing`].
    #[must_use]
    pub const fn requires_pairing(self) -> bool {
        matches!(self, Self::QrPairing | Self::PhoneFirst)
    }
}

define_kind! {
    #[doc = "Class of a client a [`Session`] originates from."]
    enum Client {
        #[doc = "Browser built into the vehicle's head unit."]
        CarBrowser = 1,

        #[doc = "Generic web browser."]
        Web = 2,

        #[doc = "Native mobile application."]
        App = 3,
    }
}

/// Fingerprint of a vehicle reported by its client.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Vehicle {
    /// Vehicle make.
    pub make: Option<String>,

    /// Vehicle model.
    pub model: Option<String>,

    /// User agent of the in-vehicle browser.
    pub user_agent: Option<String>,
}

/// Metadata of a [`Session`] entry.
#[derive(Clone, Debug)]
pub struct Entry {
    /// [`IdempotencyKey`] of the entry request.
    pub idempotency_key: Option<IdempotencyKey>,

    /// ID of the driver, if known upfront.
    pub driver_id: Option<driver::Id>,

    /// ID of the merchant to visit.
    pub merchant_id: merchant::Id,

    /// ID of the charger, if known upfront.
    pub charger_id: Option<charger::Id>,

    /// Entry [`Flow`].
    pub flow: Flow,

    /// Originating [`Client`].
    pub client: Client,

    /// Reported [`Vehicle`] fingerprint.
    pub vehicle: Option<Vehicle>,
}

define_kind! {
    #[doc = "Method of verifying a driver's arrival."]
    enum Method {
        #[doc = "Location reported by the in-vehicle device."]
        DeviceGeofence = 1,

        #[doc = "Location reported by the driver's phone."]
        PhoneGeofence = 2,

        #[doc = "QR code scanned at the charger."]
        QrScan = 3,
    }
}

/// Successful verification of a driver's arrival.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Verification {
    /// [`Method`] the arrival was verified with.
    pub method: Method,

    /// [`DateTime`] when the arrival was verified.
    pub verified_at: VerificationDateTime,

    /// Reported [`Coordinates`], if the [`Method`] uses any.
    pub location: Option<Coordinates>,
}

define_kind! {
    #[doc = "Way an order got bound to a [`Session`]."]
    enum OrderSource {
        #[doc = "Queued ahead of the arrival."]
        Queued = 1,

        #[doc = "Placed at the counter and referenced on code redemption."]
        Counter = 2,
    }
}

define_kind! {
    #[doc = "Confidence in the total of an [`OrderBinding`]."]
    enum Confidence {
        #[doc = "Total is verified by the point of sale."]
        Verified = 1,

        #[doc = "Total is estimated by the driver."]
        Estimated = 2,

        #[doc = "Total is unknown."]
        Unknown = 3,
    }
}

/// Order bound to a [`Session`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderBinding {
    /// Merchant-side number of the order.
    pub number: Option<order::Number>,

    /// [`OrderSource`] of the binding.
    pub source: OrderSource,

    /// Total reported by the point of sale.
    pub pos_total: Option<Cents>,

    /// Total estimated by the driver.
    pub estimated_total: Option<Cents>,
}

impl OrderBinding {
    /// Returns the [`Confidence`] in the total of this [`OrderBinding`].
    #[must_use]
    pub fn confidence(&self) -> Confidence {
        if self.pos_total.is_some() {
            Confidence::Verified
        } else if self.estimated_total.is_some() {
            Confidence::Estimated
        } else {
            Confidence::Unknown
        }
    }
}

define_kind! {
    #[doc = "Billing status of a [`Session`]."]
    enum BillingStatus {
        #[doc = "Not settled yet."]
        Pending = 1,

        #[doc = "Billing event is issued."]
        Billed = 2,

        #[doc = "Settled without any billable total."]
        Unbillable = 3,
    }
}

/// [`DateTime`] of a [`Session`] creation.
pub type CreationDateTime = DateTimeOf<(Session, unit::Creation)>;

/// [`DateTime`] of a [`Session`] expiration.
pub type ExpirationDateTime = DateTimeOf<(Session, unit::Expiration)>;

/// [`DateTime`] of an [`ArrivalCode`] expiration.
pub type CodeExpirationDateTime = DateTimeOf<(ArrivalCode, unit::Expiration)>;

/// [`DateTime`] of a [`Session`] verification.
pub type VerificationDateTime = DateTimeOf<(Session, unit::Verification)>;

/// [`DateTime`] of an [`ArrivalCode`] redemption.
pub type RedemptionDateTime = DateTimeOf<(ArrivalCode, unit::Redemption)>;

/// [`DateTime`] of a merchant confirmation.
pub type ConfirmationDateTime = DateTimeOf<(Session, unit::Confirmation)>;

/// [`DateTime`] of a [`Session`] cancellation.
pub type CancellationDateTime = DateTimeOf<(Session, unit::Cancellation)>;
