//! [`Rejection`] definitions.
//!
//! Every failed operation is described by a [`Rejection`] carrying a stable
//! [`Reason`] code callers may branch on, so no transport-specific status
//! codes leak into the service.

use std::time::Duration;

use common::define_kind;
use tracerr::Traced;

use crate::{
    domain::{geo::Distance, session},
    rate_limit::{Denial, DenialReason},
};

define_kind! {
    #[doc = "Class of a [`Rejection`]."]
    enum Kind {
        #[doc = "Malformed input, never retried automatically."]
        Validation = 1,

        #[doc = "Equivalent operation has happened already."]
        Conflict = 2,

        #[doc = "Unknown session, code, charger or merchant."]
        NotFound = 3,

        #[doc = "Time-to-live has lapsed."]
        Expired = 4,

        #[doc = "Geofence check has failed."]
        TooFar = 5,

        #[doc = "Request rate is exceeded."]
        RateLimited = 6,

        #[doc = "Operation is not allowed in the current state."]
        InvalidState = 7,

        #[doc = "Infrastructure failure, may be retried."]
        Transient = 8,
    }
}

define_kind! {
    #[doc = "Stable reason code of a [`Rejection`]."]
    enum Reason {
        #[doc = "Authenticated flow requires a driver."]
        DriverRequired = 1,

        #[doc = "Anonymous flow must be started via pairing."]
        PairingRequired = 2,

        #[doc = "Phone-first flow requires a phone number."]
        PhoneRequired = 3,

        #[doc = "Flow doesn't support pairing."]
        PairingUnsupported = 4,

        #[doc = "Pairing token is malformed or forged."]
        InvalidToken = 5,

        #[doc = "Authenticated identity doesn't match the pairing token."]
        IdentityMismatch = 6,

        #[doc = "Geofence verification requires a location."]
        LocationRequired = 7,

        #[doc = "QR verification requires a scanned payload."]
        QrRequired = 8,

        #[doc = "Scanned QR payload doesn't encode a charger."]
        InvalidQr = 9,

        #[doc = "No charger is bound to the session."]
        ChargerNotBound = 10,

        #[doc = "Driver already has an active session in this flow."]
        ActiveSessionExists = 11,

        #[doc = "Session is paired with another driver."]
        AlreadyPaired = 12,

        #[doc = "Scanned charger differs from the bound one."]
        ChargerMismatch = 13,

        #[doc = "Session doesn't exist."]
        SessionNotFound = 14,

        #[doc = "Arrival or pairing code doesn't exist."]
        CodeNotFound = 15,

        #[doc = "Charger is unknown to the directory."]
        ChargerNotFound = 16,

        #[doc = "Merchant is unknown to the directory."]
        MerchantNotFound = 17,

        #[doc = "Session has expired."]
        SessionExpired = 18,

        #[doc = "Pairing token has expired."]
        TokenExpired = 19,

        #[doc = "Arrival code has expired."]
        CodeExpired = 20,

        #[doc = "Reported location is outside the geofence."]
        TooFar = 21,

        #[doc = "Identity is locked out after consecutive failures."]
        LockedOut = 22,

        #[doc = "Identity has succeeded too recently."]
        Cooldown = 23,

        #[doc = "Identity has made too many requests."]
        RateExceeded = 24,

        #[doc = "Session has run out of verification attempts."]
        TooManyAttempts = 25,

        #[doc = "Operation is not allowed in the current session status."]
        InvalidState = 26,

        #[doc = "Infrastructure has failed."]
        Transient = 27,
    }
}

impl Reason {
    /// Returns the [`Kind`] of this [`Reason`].
    #[must_use]
    pub const fn kind(self) -> Kind {
        match self {
            Self::DriverRequired
            | Self::PairingRequired
            | Self::PhoneRequired
            | Self::PairingUnsupported
            | Self::InvalidToken
            | Self::IdentityMismatch
            | Self::LocationRequired
            | Self::QrRequired
            | Self::InvalidQr
            | Self::ChargerNotBound => Kind::Validation,
            Self::ActiveSessionExists
            | Self::AlreadyPaired
            | Self::ChargerMismatch => Kind::Conflict,
            Self::SessionNotFound
            | Self::CodeNotFound
            | Self::ChargerNotFound
            | Self::MerchantNotFound => Kind::NotFound,
            Self::SessionExpired | Self::TokenExpired | Self::CodeExpired => {
                Kind::Expired
            }
            Self::TooFar => Kind::TooFar,
            Self::LockedOut
            | Self::Cooldown
            | Self::RateExceeded
            | Self::TooManyAttempts => Kind::RateLimited,
            Self::InvalidState => Kind::InvalidState,
            Self::Transient => Kind::Transient,
        }
    }
}

impl From<DenialReason> for Reason {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::LockedOut => Self::LockedOut,
            DenialReason::Cooldown => Self::Cooldown,
            DenialReason::RateExceeded => Self::RateExceeded,
        }
    }
}

/// Structured description of a failed operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    /// [`Kind`] of this [`Rejection`].
    pub kind: Kind,

    /// Stable [`Reason`] code of this [`Rejection`].
    pub reason: Reason,

    /// Human-readable message.
    pub message: String,

    /// Measured [`Distance`] of a failed geofence check.
    pub distance: Option<Distance>,

    /// Time after which a rate-limited request may be retried.
    pub retry_after: Option<Duration>,

    /// ID of the conflicting active [`Session`].
    ///
    /// [`Session`]: crate::domain::Session
    pub existing_session: Option<session::Id>,
}

impl Rejection {
    /// Creates a new [`Rejection`] with the provided [`Reason`] and message.
    #[must_use]
    pub fn new(reason: Reason, message: impl ToString) -> Self {
        Self {
            kind: reason.kind(),
            reason,
            message: message.to_string(),
            distance: None,
            retry_after: None,
            existing_session: None,
        }
    }

    /// Creates a new [`Kind::Transient`] [`Rejection`].
    #[must_use]
    pub fn transient(message: impl ToString) -> Self {
        Self::new(Reason::Transient, message)
    }

    /// Creates a new [`Rejection`] out of a rate limiter's [`Denial`].
    #[must_use]
    pub fn denied(denial: Denial, message: impl ToString) -> Self {
        Self::new(denial.reason.into(), message)
            .with_retry_after(denial.retry_after)
    }

    /// Attaches the measured [`Distance`] to this [`Rejection`].
    #[must_use]
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = Some(distance);
        self
    }

    /// Attaches the retry delay to this [`Rejection`].
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Attaches the conflicting [`Session`] ID to this [`Rejection`].
    ///
    /// [`Session`]: crate::domain::Session
    #[must_use]
    pub fn with_existing_session(mut self, id: session::Id) -> Self {
        self.existing_session = Some(id);
        self
    }
}

/// Conversion of an error into a [`Rejection`].
pub trait AsRejection {
    /// Describes this error as a [`Rejection`].
    fn as_rejection(&self) -> Rejection;
}

impl<E: AsRejection> AsRejection for Traced<E> {
    fn as_rejection(&self) -> Rejection {
        self.as_ref().as_rejection()
    }
}
