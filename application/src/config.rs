//! [`Config`]-related definitions.

use std::time;

use common::{BasisPoints, Cents};
use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use derive_more::{Display, Error};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use service::{
    domain::{charger, geo, merchant, order},
    infra::{database::memory, gateway::r#static},
};
use smart_default::SmartDefault;

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Service configuration.
    #[serde(default)]
    pub service: Service,

    /// Database configuration.
    #[serde(default)]
    pub database: Database,

    /// Redis configuration.
    #[serde(default)]
    pub redis: Redis,

    /// Directory of known places and orders.
    #[serde(default)]
    pub directory: Directory,

    /// Log configuration.
    #[serde(default)]
    pub log: Log,
}

impl Config {
    /// Creates a new [`Config`] by:
    /// - loading it from the provided `path` (if any);
    /// - merging it with the environment variables (if any);
    /// - using default values for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        ConfigBuilder::<DefaultState>::default()
            .add_source(config::File::with_name(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("CONF").separator("."))
            .build()?
            .try_deserialize()
    }
}

/// Service configuration.
#[derive(Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Service {
    /// [JWT] secret signing pairing tokens.
    ///
    /// [JWT]: https://wikipedia.org/wiki/JSON_Web_Token
    #[default(SecretString::from("secret"))]
    pub jwt_secret: SecretString,

    /// Sessions lifecycle configuration.
    pub session: Session,

    /// Geofences configuration.
    pub geofence: Geofence,

    /// Queued orders configuration.
    pub order: Order,

    /// Settlement configuration.
    pub billing: Billing,

    /// Rate limiting configuration.
    pub rate_limit: RateLimit,

    /// Service tasks configuration.
    pub tasks: Tasks,
}

impl TryFrom<Service> for service::Config {
    type Error = InvalidConfig;

    fn try_from(value: Service) -> Result<Self, Self::Error> {
        let Service {
            jwt_secret,
            session,
            geofence,
            order,
            billing,
            rate_limit,
            tasks:
                Tasks {
                    expire_sessions,
                    prune_rate_limits,
                },
        } = value;

        let mut config =
            Self::with_secret(jwt_secret.expose_secret().as_bytes());
        config.session = session.into();
        config.geofence = service::config::Geofence {
            charger_radius_m: geofence.charger_radius_m,
            merchant_radius_m: geofence.merchant_radius_m,
        };
        config.order = service::config::Order {
            prep_time: order.prep_time,
            walking_speed_mps: order.walking_speed_mps,
        };
        config.billing = billing.try_into()?;
        config.rate_limit = rate_limit.into();
        config.expire_sessions.interval = expire_sessions.interval;
        config.prune_rate_limits.interval = prune_rate_limits.interval;
        Ok(config)
    }
}

/// Sessions lifecycle configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Session {
    /// Time-to-live of a phone-first session.
    #[default(time::Duration::from_secs(10 * 60))]
    #[serde(with = "humantime_serde")]
    pub phone_first_ttl: time::Duration,

    /// Time-to-live of a QR-pairing session.
    #[default(time::Duration::from_secs(30 * 60))]
    #[serde(with = "humantime_serde")]
    pub qr_pairing_ttl: time::Duration,

    /// Time-to-live of an authenticated session.
    #[default(time::Duration::from_secs(30 * 60))]
    #[serde(with = "humantime_serde")]
    pub authenticated_ttl: time::Duration,

    /// Time-to-live of a pairing token.
    #[default(time::Duration::from_secs(10 * 60))]
    #[serde(with = "humantime_serde")]
    pub pairing_token_ttl: time::Duration,

    /// Time an arrival code stays redeemable.
    #[default(time::Duration::from_secs(30 * 60))]
    #[serde(with = "humantime_serde")]
    pub code_ttl: time::Duration,

    /// Maximum number of verification attempts per session.
    #[default(10)]
    pub max_verification_attempts: u8,
}

impl From<Session> for service::config::Session {
    fn from(value: Session) -> Self {
        let Session {
            phone_first_ttl,
            qr_pairing_ttl,
            authenticated_ttl,
            pairing_token_ttl,
            code_ttl,
            max_verification_attempts,
        } = value;
        Self {
            phone_first_ttl,
            qr_pairing_ttl,
            authenticated_ttl,
            pairing_token_ttl,
            code_ttl,
            max_verification_attempts,
        }
    }
}

/// Geofences configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Geofence {
    /// Radius around a charger an arrival is verified within, in meters.
    #[default(250.0)]
    pub charger_radius_m: f64,

    /// Radius around a merchant a queued order is released within, in
    /// meters.
    #[default(500.0)]
    pub merchant_radius_m: f64,
}

/// Queued orders configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Order {
    /// Time a merchant needs to prepare an order.
    #[default(time::Duration::from_secs(15 * 60))]
    #[serde(with = "humantime_serde")]
    pub prep_time: time::Duration,

    /// Walking speed of a driver, in meters per second.
    #[default(1.4)]
    pub walking_speed_mps: f64,
}

/// Settlement configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Billing {
    /// Fee rate applied to an order total, in basis points.
    #[default(500)]
    pub fee_bps: u16,

    /// Minimum billable amount, in cents.
    #[default(50)]
    pub min_fee_cents: u64,

    /// Maximum billable amount, in cents.
    #[default(500)]
    pub max_fee_cents: u64,
}

impl TryFrom<Billing> for service::config::Billing {
    type Error = InvalidConfig;

    fn try_from(value: Billing) -> Result<Self, Self::Error> {
        let Billing {
            fee_bps,
            min_fee_cents,
            max_fee_cents,
        } = value;
        Ok(Self {
            fee_rate: BasisPoints::new(fee_bps)
                .ok_or(InvalidConfig::FeeRate(fee_bps))?,
            min_fee: Cents::new(min_fee_cents),
            max_fee: Cents::new(max_fee_cents),
        })
    }
}

/// Rate limiting configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct RateLimit {
    /// Maximum number of requests per `window`.
    #[default(5)]
    pub max_requests: u32,

    /// Sliding window bounding the request rate.
    #[default(time::Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub window: time::Duration,

    /// Time after a success during which further requests are denied.
    #[default(time::Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub cooldown: time::Duration,

    /// Number of consecutive failures installing a lockout.
    #[default(5)]
    pub failure_threshold: u32,

    /// Duration of a lockout.
    #[default(time::Duration::from_secs(15 * 60))]
    #[serde(with = "humantime_serde")]
    pub lockout: time::Duration,
}

impl From<RateLimit> for service::rate_limit::Config {
    fn from(value: RateLimit) -> Self {
        let RateLimit {
            max_requests,
            window,
            cooldown,
            failure_threshold,
            lockout,
        } = value;
        Self {
            max_requests,
            window,
            cooldown,
            failure_threshold,
            lockout,
        }
    }
}

/// Service tasks configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Tasks {
    /// `ExpireSessions` task configuration.
    #[default(Task { interval: time::Duration::from_secs(60) })]
    pub expire_sessions: Task,

    /// `PruneRateLimits` task configuration.
    #[default(Task { interval: time::Duration::from_secs(5 * 60) })]
    pub prune_rate_limits: Task,
}

/// Service task configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Task {
    /// Task execution interval.
    #[default(time::Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub interval: time::Duration,
}

/// Database configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Database {
    /// Time a record lock is waited for before giving up.
    #[default(time::Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub lock_timeout: time::Duration,
}

impl From<Database> for memory::Config {
    fn from(value: Database) -> Self {
        let Database { lock_timeout } = value;
        Self { lock_timeout }
    }
}

/// Redis configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Redis {
    /// URL to connect to, if the rate limiting counters are to be shared.
    pub url: Option<String>,
}

/// Directory of known places and orders.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Directory {
    /// Known chargers.
    pub chargers: Vec<Place>,

    /// Known merchants.
    pub merchants: Vec<Place>,

    /// Orders known to the merchants' points of sale.
    pub pos_orders: Vec<PosOrder>,
}

impl TryFrom<Directory> for r#static::Directory {
    type Error = InvalidConfig;

    fn try_from(value: Directory) -> Result<Self, Self::Error> {
        let Directory {
            chargers,
            merchants,
            pos_orders,
        } = value;

        let chargers = chargers
            .into_iter()
            .map(|p| {
                let id = charger::Id::new(p.id.as_str())
                    .ok_or_else(|| InvalidConfig::ChargerId(p.id.clone()))?;
                Ok((id, p.try_into()?))
            })
            .collect::<Result<_, InvalidConfig>>()?;
        let merchants = merchants
            .into_iter()
            .map(|p| {
                let id = merchant::Id::new(p.id.as_str())
                    .ok_or_else(|| InvalidConfig::MerchantId(p.id.clone()))?;
                Ok((id, p.try_into()?))
            })
            .collect::<Result<_, InvalidConfig>>()?;
        let pos_orders = pos_orders
            .into_iter()
            .map(|o| {
                let merchant_id = merchant::Id::new(o.merchant_id.as_str())
                    .ok_or_else(|| InvalidConfig::MerchantId(o.merchant_id))?;
                let number = order::Number::new(&o.number)
                    .ok_or_else(|| InvalidConfig::OrderNumber(o.number))?;
                let status = o
                    .status
                    .parse::<order::PosStatus>()
                    .map_err(|_| InvalidConfig::PosStatus(o.status))?;
                let order = order::PosOrder {
                    total: Cents::new(o.total_cents),
                    status,
                };
                Ok(((merchant_id, number), order))
            })
            .collect::<Result<_, InvalidConfig>>()?;

        Ok(Self {
            chargers,
            merchants,
            pos_orders,
        })
    }
}

/// Known charger or merchant.
#[derive(Clone, Debug, Deserialize)]
pub struct Place {
    /// ID of this [`Place`].
    pub id: String,

    /// Human-readable name of this [`Place`].
    pub name: String,

    /// Latitude of this [`Place`], in degrees.
    pub lat: f64,

    /// Longitude of this [`Place`], in degrees.
    pub lng: f64,
}

impl TryFrom<Place> for geo::Place {
    type Error = InvalidConfig;

    fn try_from(value: Place) -> Result<Self, Self::Error> {
        let Place { id, name, lat, lng } = value;
        Ok(Self {
            name,
            location: geo::Coordinates::new(lat, lng)
                .ok_or(InvalidConfig::Coordinates(id))?,
        })
    }
}

/// Order known to a merchant's point of sale.
#[derive(Clone, Debug, Deserialize)]
pub struct PosOrder {
    /// ID of the merchant the order is placed at.
    pub merchant_id: String,

    /// Merchant-side number of the order.
    pub number: String,

    /// Total of the order, in cents.
    pub total_cents: u64,

    /// Status of the order (`open`, `paid` or `voided`).
    pub status: String,
}

/// Error of converting a [`Config`] into the [`service`] one.
#[derive(Clone, Debug, Display, Error)]
pub enum InvalidConfig {
    /// Fee rate exceeds the whole.
    #[display("Fee rate of {_0} basis points exceeds the whole")]
    FeeRate(#[error(not(source))] u16),

    /// Malformed charger ID.
    #[display("Invalid charger ID: `{_0}`")]
    ChargerId(#[error(not(source))] String),

    /// Malformed merchant ID.
    #[display("Invalid merchant ID: `{_0}`")]
    MerchantId(#[error(not(source))] String),

    /// Malformed order number.
    #[display("Invalid order number: `{_0}`")]
    OrderNumber(#[error(not(source))] String),

    /// Unknown point of sale order status.
    #[display("Unknown order status: `{_0}`")]
    PosStatus(#[error(not(source))] String),

    /// Coordinates out of range.
    #[display("Coordinates of `{_0}` are out of range")]
    Coordinates(#[error(not(source))] String),
}

/// Log configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Log {
    /// Log level.
    pub level: LogLevel,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Designates very low priority, often extremely verbose, information.
    Trace,

    /// Designates lower priority information.
    Debug,

    /// Designates useful information.
    #[default]
    Info,

    /// Designates hazardous situations.
    Warn,

    /// Designates very serious errors.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[cfg(test)]
mod spec {
    use super::{Billing, Directory, InvalidConfig, Place, PosOrder};
    use service::infra::gateway::r#static;

    #[test]
    fn rejects_excessive_fee_rate() {
        let billing = Billing {
            fee_bps: 10_001,
            ..Billing::default()
        };

        let err = service::config::Billing::try_from(billing).unwrap_err();

        assert!(matches!(err, InvalidConfig::FeeRate(10_001)));
    }

    #[test]
    fn converts_directory() {
        let directory = Directory {
            chargers: vec![Place {
                id: "ch_01".into(),
                name: "Hayes Valley".into(),
                lat: 37.7765,
                lng: -122.4234,
            }],
            merchants: vec![],
            pos_orders: vec![PosOrder {
                merchant_id: "m_01".into(),
                number: "P-1".into(),
                total_cents: 4_200,
                status: "paid".into(),
            }],
        };

        let directory = r#static::Directory::try_from(directory).unwrap();

        assert_eq!(directory.chargers.len(), 1);
        assert_eq!(directory.pos_orders.len(), 1);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let directory = Directory {
            merchants: vec![Place {
                id: "m_01".into(),
                name: "Nowhere".into(),
                lat: 91.0,
                lng: 0.0,
            }],
            ..Directory::default()
        };

        let err = r#static::Directory::try_from(directory).unwrap_err();

        assert!(matches!(err, InvalidConfig::Coordinates(id) if id == "m_01"));
    }
}
