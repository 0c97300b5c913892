//! Configuration of the [`Service`] operations.
//!
//! [`Service`]: crate::Service

use std::time::Duration;

use common::{BasisPoints, Cents};
use smart_default::SmartDefault;

use crate::domain::{billing::FeePolicy, geo::Distance, session::Flow};

/// Default platform's fee rate of 5%.
const DEFAULT_FEE_RATE: BasisPoints = match BasisPoints::new(500) {
    Some(rate) => rate,
    None => panic!("fee rate exceeds the whole"),
};

/// [`Session`] lifecycle configuration.
///
/// [`Session`]: crate::domain::Session
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Session {
    /// Time-to-live of a [`Flow::PhoneFirst`] session.
    #[default(Duration::from_secs(10 * 60))]
    pub phone_first_ttl: Duration,

    /// Time-to-live of a [`Flow::QrPairing`] session.
    #[default(Duration::from_secs(30 * 60))]
    pub qr_pairing_ttl: Duration,

    /// Time-to-live of a [`Flow::Authenticated`] session.
    #[default(Duration::from_secs(30 * 60))]
    pub authenticated_ttl: Duration,

    /// Time-to-live of a pairing token.
    #[default(Duration::from_secs(10 * 60))]
    pub pairing_token_ttl: Duration,

    /// Time an arrival code stays redeemable.
    #[default(Duration::from_secs(30 * 60))]
    pub code_ttl: Duration,

    /// Maximum number of verification attempts per session.
    #[default(10)]
    pub max_verification_attempts: u8,
}

impl Session {
    /// Returns the time-to-live of a session entered through the provided
    /// [`Flow`].
    #[must_use]
    pub const fn ttl(&self, flow: Flow) -> Duration {
        match flow {
            Flow::PhoneFirst => self.phone_first_ttl,
            Flow::QrPairing => self.qr_pairing_ttl,
            Flow::Authenticated => self.authenticated_ttl,
        }
    }
}

/// Geofence configuration.
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Geofence {
    /// Radius around a charger an arrival is verified within, in meters.
    #[default(250.0)]
    pub charger_radius_m: f64,

    /// Radius around a merchant a queued order is released within, in
    /// meters.
    #[default(500.0)]
    pub merchant_radius_m: f64,
}

impl Geofence {
    /// Returns the radius around a charger.
    ///
    /// Misconfigured radius verifies nothing.
    #[must_use]
    pub fn charger_radius(&self) -> Distance {
        Distance::from_meters(self.charger_radius_m).unwrap_or(Distance::ZERO)
    }

    /// Returns the radius around a merchant.
    ///
    /// Misconfigured radius releases nothing.
    #[must_use]
    pub fn merchant_radius(&self) -> Distance {
        Distance::from_meters(self.merchant_radius_m)
            .unwrap_or(Distance::ZERO)
    }
}

/// Queued orders configuration.
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Order {
    /// Time a merchant needs to prepare an order.
    #[default(Duration::from_secs(15 * 60))]
    pub prep_time: Duration,

    /// Walking speed of a driver, in meters per second.
    #[default(1.4)]
    pub walking_speed_mps: f64,
}

/// Settlement configuration.
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Billing {
    /// Fee rate applied to an order total.
    #[default(DEFAULT_FEE_RATE)]
    pub fee_rate: BasisPoints,

    /// Minimum billable amount.
    #[default(Cents::new(50))]
    pub min_fee: Cents,

    /// Maximum billable amount.
    #[default(Cents::new(500))]
    pub max_fee: Cents,
}

impl Billing {
    /// Returns the [`FeePolicy`] of this configuration.
    #[must_use]
    pub const fn policy(&self) -> FeePolicy {
        FeePolicy {
            rate: self.fee_rate,
            min: self.min_fee,
            max: self.max_fee,
        }
    }
}
