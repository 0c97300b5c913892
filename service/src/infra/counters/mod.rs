//! [`CounterStore`]-related implementations.

pub mod local;
#[cfg(feature = "redis")]
pub mod redis;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use common::DateTime;
use derive_more::{Display, Error as StdError, From};
use tracerr::Traced;

pub use self::local::Local;
#[cfg(feature = "redis")]
pub use self::redis::Redis;

/// Store of rate-limiting counters, shared by identity.
///
/// Every operation is atomic with respect to its key.
#[async_trait]
pub trait CounterStore: fmt::Debug + Send + Sync {
    /// Registers a hit at the provided moment in the sliding `window` of the
    /// provided `key`, unless there are `limit` hits in it already.
    async fn hit(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<Error>>;

    /// Inspects the sliding `window` of the provided `key` at the provided
    /// moment the same way [`CounterStore::hit()`] does, without registering
    /// anything.
    async fn peek(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<Error>>;

    /// Returns the moment the lockout of the provided `key` ends at, if it is
    /// locked out at the provided moment.
    async fn lockout(
        &self,
        key: &str,
        at: DateTime,
    ) -> Result<Option<DateTime>, Traced<Error>>;

    /// Returns the moment of the last success of the provided `key`.
    async fn last_success(
        &self,
        key: &str,
    ) -> Result<Option<DateTime>, Traced<Error>>;

    /// Records a success of the provided `key`, clearing its failures and
    /// lockout.
    async fn succeed(
        &self,
        key: &str,
        at: DateTime,
        retain: Duration,
    ) -> Result<(), Traced<Error>>;

    /// Records a consecutive failure of the provided `key`, locking it out
    /// for the provided duration once the `threshold` is reached.
    ///
    /// Returns the moment the installed lockout ends at, if any.
    async fn fail(
        &self,
        key: &str,
        at: DateTime,
        failure: Failure,
    ) -> Result<Option<DateTime>, Traced<Error>>;
}

/// Outcome of a [`CounterStore::hit()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hit {
    /// Whether the hit fits into the limit and has been registered.
    pub allowed: bool,

    /// Number of hits in the window, including the registered one, if any.
    pub count: u32,

    /// Moment of the oldest hit still in the window.
    pub oldest: Option<DateTime>,
}

/// Parameters of a [`CounterStore::fail()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Failure {
    /// Number of consecutive failures installing a lockout.
    pub threshold: u32,

    /// Duration of the installed lockout.
    pub lockout: Duration,

    /// Duration the failures are remembered for.
    pub retain: Duration,
}

/// [`CounterStore`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// [`Redis`] error.
    #[cfg(feature = "redis")]
    Redis(redis::Error),

    /// Store is unavailable.
    #[display("Counter store is unavailable")]
    Unavailable,
}
