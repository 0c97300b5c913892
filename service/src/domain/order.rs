//! [`QueuedOrder`] definitions.

use std::time::Duration;

#[cfg(doc)]
use common::DateTime;
use common::{define_kind, unit, Cents, DateTimeOf};
use derive_more::{AsRef, Display, From, FromStr, Into};
use url::Url;
use uuid::Uuid;

use crate::domain::{geo::Distance, merchant, session};
#[cfg(doc)]
use crate::domain::Session;

/// Order deferred until the driver's arrival.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueuedOrder {
    /// ID of this [`QueuedOrder`].
    pub id: Id,

    /// ID of the [`Session`] owning this [`QueuedOrder`].
    pub session_id: session::Id,

    /// ID of the merchant fulfilling this [`QueuedOrder`].
    pub merchant_id: merchant::Id,

    /// [`Destination`] this [`QueuedOrder`] is released to.
    pub destination: Destination,

    /// Merchant-side [`Number`] of this [`QueuedOrder`], if known.
    pub number: Option<Number>,

    /// Opaque order payload passed through to the merchant.
    pub payload: Option<String>,

    /// Total estimated by the driver.
    pub estimated_total: Option<Cents>,

    /// Current [`Status`] of this [`QueuedOrder`].
    pub status: Status,

    /// [`DateTime`] when this [`QueuedOrder`] was created.
    pub created_at: CreationDateTime,

    /// [`DateTime`] when this [`QueuedOrder`] was released.
    pub released_at: Option<ReleaseDateTime>,

    /// [`DateTime`] when this [`QueuedOrder`] was canceled.
    pub canceled_at: Option<CancellationDateTime>,
}

impl QueuedOrder {
    /// Name of the query parameter carrying the [`Session`] tracking handle
    /// in a [`ReleaseArtifact`].
    pub const TRACKING_PARAM: &'static str = "arrival_session";

    /// Releases this [`QueuedOrder`] at the provided `now`.
    ///
    /// Releasing an already released [`QueuedOrder`] keeps its original
    /// [`ReleaseArtifact`]. [`None`] is returned if it has been canceled.
    pub fn release(&mut self, now: ReleaseDateTime) -> Option<ReleaseArtifact> {
        if self.status == Status::Queued {
            self.status = Status::Released;
            self.released_at = Some(now);
        }
        self.artifact()
    }

    /// Cancels this [`QueuedOrder`] at the provided `now`.
    ///
    /// Returns `false` if it is not queued anymore.
    pub fn cancel(&mut self, now: CancellationDateTime) -> bool {
        if self.status != Status::Queued {
            return false;
        }
        self.status = Status::Canceled;
        self.canceled_at = Some(now);
        true
    }

    /// Returns the [`ReleaseArtifact`] of this [`QueuedOrder`], if it has been
    /// released.
    #[must_use]
    pub fn artifact(&self) -> Option<ReleaseArtifact> {
        let released_at = self.released_at.filter(|_| {
            self.status == Status::Released
        })?;

        let mut url = self.destination.0.clone();
        _ = url
            .query_pairs_mut()
            .append_pair(Self::TRACKING_PARAM, &self.session_id.to_string());

        Some(ReleaseArtifact {
            order_id: self.id,
            session_id: self.session_id,
            url,
            released_at,
        })
    }
}

/// ID of a [`QueuedOrder`].
#[derive(
    Clone, Copy, Debug, Display, Eq, From, FromStr, Hash, Into, PartialEq,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

/// Merchant-side number of an order, as printed on a receipt.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(str)]
pub struct Number(String);

impl Number {
    /// Maximum length of a [`Number`].
    const MAX_LEN: usize = 64;

    /// Creates a new [`Number`] if the given `number` is valid.
    #[must_use]
    pub fn new(number: impl AsRef<str>) -> Option<Self> {
        let number = number.as_ref().trim();
        (!number.is_empty()
            && number.len() <= Self::MAX_LEN
            && !number.chars().any(char::is_control))
        .then(|| Self(number.to_owned()))
    }
}

impl FromStr for Number {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid order `Number`")
    }
}

/// URL or handle a [`QueuedOrder`] is released to.
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
pub struct Destination(Url);

impl Destination {
    /// Creates a new [`Destination`] if the given `url` is an absolute URL
    /// which may carry query parameters.
    #[must_use]
    pub fn new(url: impl AsRef<str>) -> Option<Self> {
        let url = Url::parse(url.as_ref()).ok()?;
        (!url.cannot_be_a_base()).then_some(Self(url))
    }
}

impl FromStr for Destination {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid order `Destination`")
    }
}

define_kind! {
    #[doc = "Status of a [`QueuedOrder`]."]
    enum Status {
        #[doc = "Waiting for a release trigger."]
        Queued = 1,

        #[doc = "Released to the merchant."]
        Released = 2,

        #[doc = "Canceled together with its [`Session`]."]
        Canceled = 3,
    }
}

/// Signal that a [`QueuedOrder`] should be fulfilled by the merchant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseArtifact {
    /// ID of the released [`QueuedOrder`].
    pub order_id: Id,

    /// ID of the [`Session`] owning the released [`QueuedOrder`].
    pub session_id: session::Id,

    /// [`Destination`] with the tracking handle appended.
    pub url: Url,

    /// [`DateTime`] of the release.
    pub released_at: ReleaseDateTime,
}

/// Order as seen by a merchant's point of sale.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PosOrder {
    /// Total of the order.
    pub total: Cents,

    /// [`PosStatus`] of the order.
    pub status: PosStatus,
}

impl PosOrder {
    /// Returns the total of this [`PosOrder`], unless it has been voided.
    #[must_use]
    pub fn billable_total(&self) -> Option<Cents> {
        (self.status != PosStatus::Voided).then_some(self.total)
    }
}

define_kind! {
    #[doc = "Status of a [`PosOrder`]."]
    enum PosStatus {
        #[doc = "Order is open."]
        Open = 1,

        #[doc = "Order is paid."]
        Paid = 2,

        #[doc = "Order is voided."]
        Voided = 3,
    }
}

/// Estimate of a driver walking to a merchant while an order is prepared.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Eta {
    /// Time the driver needs to walk to the merchant.
    pub walking: Duration,

    /// Time the merchant needs to prepare the order.
    pub preparation: Duration,

    /// Time the driver waits at the merchant for the order.
    ///
    /// The order is always released immediately, so the driver waits
    /// whenever the preparation takes longer than the walk.
    pub wait: Duration,
}

impl Eta {
    /// Estimates the [`Eta`] of walking the provided `distance` with the
    /// provided `speed` (in meters per second).
    #[must_use]
    pub fn estimate(distance: Distance, speed: f64, preparation: Duration) -> Self {
        let walking = if speed.is_finite() && speed > 0.0 {
            Duration::try_from_secs_f64(distance.meters() / speed)
                .unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        Self {
            walking,
            preparation,
            wait: preparation.saturating_sub(walking),
        }
    }
}

/// [`DateTime`] of a [`QueuedOrder`] creation.
pub type CreationDateTime = DateTimeOf<(QueuedOrder, unit::Creation)>;

/// [`DateTime`] of a [`QueuedOrder`] release.
pub type ReleaseDateTime = DateTimeOf<(QueuedOrder, unit::Release)>;

/// [`DateTime`] of a [`QueuedOrder`] cancellation.
pub type CancellationDateTime = DateTimeOf<(QueuedOrder, unit::Cancellation)>;
