//! Service contains the arrival coordination core: sessions, their
//! verification, queued orders and settlement.
//!
//! List of available Cargo features:
#![doc = document_features::document_features!()]
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod command;
pub mod config;
pub mod domain;
pub mod infra;
pub mod query;
pub mod rate_limit;
pub mod read;
pub mod rejection;
pub mod task;

use std::{error::Error, sync::Arc};

use common::operations::{By, Start};
use derive_more::Debug;

#[cfg(doc)]
use infra::{Database, Gateway};

use self::{infra::CounterStore, rate_limit::RateLimiter};

pub use self::{
    command::Command,
    query::Query,
    rejection::{AsRejection, Rejection},
    task::Task,
};

/// [`Service`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// [JWT] encoding key of pairing tokens.
    ///
    /// [JWT]: https://datatracker.ietf.org/doc/html/rfc7519
    #[debug(skip)]
    pub jwt_encoding_key: jsonwebtoken::EncodingKey,

    /// [JWT] decoding key of pairing tokens.
    ///
    /// [JWT]: https://datatracker.ietf.org/doc/html/rfc7519
    #[debug(skip)]
    pub jwt_decoding_key: jsonwebtoken::DecodingKey,

    /// Sessions lifecycle configuration.
    pub session: config::Session,

    /// Geofences configuration.
    pub geofence: config::Geofence,

    /// Queued orders configuration.
    pub order: config::Order,

    /// Settlement configuration.
    pub billing: config::Billing,

    /// [`RateLimiter`] configuration.
    pub rate_limit: rate_limit::Config,

    /// [`task::ExpireSessions`] configuration.
    pub expire_sessions: task::expire_sessions::Config,

    /// [`task::PruneRateLimits`] configuration.
    pub prune_rate_limits: task::prune_rate_limits::Config,
}

impl Config {
    /// Creates a new default [`Config`] signing pairing tokens with the
    /// provided HMAC `secret`.
    #[must_use]
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            jwt_encoding_key: jsonwebtoken::EncodingKey::from_secret(secret),
            jwt_decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
            session: config::Session::default(),
            geofence: config::Geofence::default(),
            order: config::Order::default(),
            billing: config::Billing::default(),
            rate_limit: rate_limit::Config::default(),
            expire_sessions: task::expire_sessions::Config::default(),
            prune_rate_limits: task::prune_rate_limits::Config::default(),
        }
    }
}

/// Domain service.
#[derive(Clone, Debug)]
pub struct Service<Db, Gw> {
    /// Configuration of this [`Service`].
    config: Config,

    /// [`Database`] of this [`Service`].
    database: Db,

    /// [`Gateway`] to the external collaborators of this [`Service`].
    gateway: Gw,

    /// Identity-level [`RateLimiter`] of this [`Service`].
    rate_limiter: RateLimiter,
}

impl<Db, Gw> Service<Db, Gw> {
    /// Creates a new [`Service`] with the provided parameters.
    ///
    /// Rate limiting counters are shared via the provided [`CounterStore`],
    /// if any, or kept in-process otherwise.
    pub fn new(
        config: Config,
        database: Db,
        gateway: Gw,
        counters: Option<Arc<dyn CounterStore>>,
    ) -> (Self, task::Background)
    where
        Self: Task<
                Start<By<task::ExpireSessions<Self>, task::expire_sessions::Config>>,
                Ok = (),
                Err: Error,
            > + Task<
                Start<
                    By<
                        task::PruneRateLimits<Self>,
                        task::prune_rate_limits::Config,
                    >,
                >,
                Ok = (),
                Err: Error,
            > + Clone
            + 'static,
    {
        let rate_limiter = RateLimiter::new(config.rate_limit, counters);
        let this = Service {
            config,
            database,
            gateway,
            rate_limiter,
        };

        let mut bg = task::Background::default();
        let svc = this.clone();
        bg.spawn("ExpireSessions", async move {
            svc.execute(Start(By::new(svc.config().expire_sessions)))
                .await
        });
        let svc = this.clone();
        bg.spawn("PruneRateLimits", async move {
            svc.execute(Start(By::new(svc.config().prune_rate_limits)))
                .await
        });

        (this, bg)
    }

    /// Returns [`Config`] of this [`Service`].
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns [`Database`] of this [`Service`].
    #[must_use]
    pub fn database(&self) -> &Db {
        &self.database
    }

    /// Returns [`Gateway`] of this [`Service`].
    #[must_use]
    pub fn gateway(&self) -> &Gw {
        &self.gateway
    }

    /// Returns [`RateLimiter`] of this [`Service`].
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}
