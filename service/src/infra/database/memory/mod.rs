//! In-memory transactional [`Database`] implementation.

mod impls;
pub mod non_tx;
mod tables;
pub mod tx;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use derive_more::{Deref, Display, Error as StdError};
use parking_lot::Mutex;
use smart_default::SmartDefault;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::domain::{
    driver,
    session::{self, Flow, IdempotencyKey},
};
#[cfg(doc)]
use crate::infra::Database;

pub use self::{non_tx::NonTx, tables::View, tx::Tx};

use self::tables::Tables;

/// In-memory [`Database`] client.
///
/// Transactions buffer their writes and apply them atomically on commit,
/// after checking the unique constraints against the committed state.
/// Record-scoped locks are held until the transaction is committed or
/// dropped.
#[derive(Clone, Debug, Deref)]
pub struct Memory<T = NonTx>(T);

impl Memory {
    /// Creates a new empty [`Memory`] client with the provided [`Config`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self(NonTx::new(Arc::new(State {
            config,
            tables: RwLock::default(),
            locks: Mutex::default(),
        })))
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// [`Memory`] configuration.
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Maximum time to wait for a record lock.
    #[default(Duration::from_secs(5))]
    pub lock_timeout: Duration,
}

/// Key of a record-scoped lock.
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum LockKey {
    /// Lock of a single [`Session`].
    ///
    /// [`Session`]: crate::domain::Session
    #[display("session:{_0}")]
    Session(session::Id),

    /// Lock of the active slot of a driver in a [`Flow`].
    #[display("slot:{_0}:{_1}")]
    Slot(driver::Id, Flow),

    /// Lock of an [`IdempotencyKey`].
    #[display("idempotency_key:{_0}")]
    IdempotencyKey(IdempotencyKey),
}

/// Shared state of a [`Memory`] database.
#[derive(Debug)]
struct State {
    /// [`Config`] of the database.
    config: Config,

    /// Committed rows.
    tables: RwLock<Tables>,

    /// Record-scoped locks.
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl State {
    /// Returns the lock of the provided [`LockKey`], creating it if needed.
    fn lock_of(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(key.clone()).or_default())
    }

    /// Forgets the locks nobody holds or waits for.
    fn prune_locks(&self) {
        self.locks.lock().retain(|_, l| Arc::strong_count(l) > 1);
    }
}

/// Read access to the rows visible to a [`Memory`] client.
pub trait Connection {
    /// Runs the provided function over the [`View`] of the visible rows.
    fn view<R>(&self, f: impl FnOnce(View<'_>) -> R) -> impl Future<Output = R>;
}

impl<C: Connection> Connection for Memory<C> {
    fn view<R>(&self, f: impl FnOnce(View<'_>) -> R) -> impl Future<Output = R> {
        self.0.view(f)
    }
}

/// Names of the unique constraints enforced by [`Memory`].
pub mod constraint {
    /// Uniqueness of a [`Session`] ID.
    ///
    /// [`Session`]: crate::domain::Session
    pub const SESSION_ID: &str = "sessions_pkey";

    /// Uniqueness of a [`session::IdempotencyKey`].
    ///
    /// [`session::IdempotencyKey`]: crate::domain::session::IdempotencyKey
    pub const IDEMPOTENCY_KEY: &str = "sessions_idempotency_key";

    /// Uniqueness of an [`ArrivalCode`] among active [`Session`]s.
    ///
    /// [`ArrivalCode`]: crate::domain::session::ArrivalCode
    /// [`Session`]: crate::domain::Session
    pub const ARRIVAL_CODE: &str = "sessions_active_arrival_code";

    /// At most one active [`Session`] per driver and [`Flow`].
    ///
    /// [`Flow`]: crate::domain::session::Flow
    /// [`Session`]: crate::domain::Session
    pub const ACTIVE_SLOT: &str = "sessions_active_driver_flow";

    /// At most one [`QueuedOrder`] per [`Session`].
    ///
    /// [`QueuedOrder`]: crate::domain::QueuedOrder
    /// [`Session`]: crate::domain::Session
    pub const QUEUED_ORDER: &str = "queued_orders_session_id";

    /// At most one [`BillingEvent`] per [`Session`].
    ///
    /// [`BillingEvent`]: crate::domain::BillingEvent
    /// [`Session`]: crate::domain::Session
    pub const BILLING_EVENT: &str = "billing_events_session_id";
}

/// [`Memory`] database error.
#[derive(Debug, Display, StdError)]
pub enum Error {
    /// Commit would violate a unique constraint.
    #[display("Unique constraint `{_0}` violated")]
    UniqueViolation(#[error(not(source))] &'static str),

    /// Record lock wasn't acquired in time.
    #[display("Timed out waiting for the `{_0}` lock")]
    LockTimeout(#[error(not(source))] LockKey),
}

impl Error {
    /// Checks if the error is a unique violation of the specified constraint.
    #[must_use]
    pub fn is_unique_violation(&self, constraint: Option<&str>) -> bool {
        match self {
            Self::UniqueViolation(c) => constraint.map_or(true, |x| x == *c),
            Self::LockTimeout(_) => false,
        }
    }

    /// Checks if the error is caused by a contention on a record lock.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}
