//! [`Tx`] client definitions.

use std::{collections::HashMap, mem, sync::Arc};

use parking_lot::Mutex;
use tokio::{sync::OwnedMutexGuard, time};
use tracerr::Traced;
use tracing as log;

use crate::infra::database::{self, memory};

use super::{tables::Pending, Connection, LockKey, NonTx, State, View};

/// Transactional in-memory database client.
///
/// Dropping the last clone of a [`Tx`] without committing it rolls it back.
#[derive(Clone, Debug)]
pub struct Tx {
    /// Inner representation of this client.
    inner: Arc<Inner>,
}

/// Inner representation of the [`Tx`] client.
#[derive(Debug)]
struct Inner {
    /// Shared [`State`] of the database.
    state: Arc<State>,

    /// Buffered writes.
    pending: Mutex<Pending>,

    /// Record locks held by this transaction.
    held: Mutex<HashMap<LockKey, OwnedMutexGuard<()>>>,
}

impl Inner {
    /// Releases all the record locks held by this transaction.
    fn release_locks(&self) {
        let held = mem::take(&mut *self.held.lock());
        if held.is_empty() {
            return;
        }
        drop(held);
        self.state.prune_locks();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release_locks();
    }
}

impl Tx {
    /// Opens a new [`Tx`] from the provided [`NonTx`] client.
    #[must_use]
    pub fn from_non_tx(client: &NonTx) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Arc::clone(&client.state),
                pending: Mutex::default(),
                held: Mutex::default(),
            }),
        }
    }

    /// Acquires the lock of the provided [`LockKey`] until this [`Tx`] is
    /// committed or dropped.
    ///
    /// Re-acquiring a lock held by this [`Tx`] already is a no-op.
    ///
    /// # Errors
    ///
    /// If the lock isn't acquired within the configured timeout.
    pub async fn lock(&self, key: LockKey) -> Result<(), Traced<database::Error>> {
        if self.inner.held.lock().contains_key(&key) {
            return Ok(());
        }

        let lock = self.inner.state.lock_of(&key);
        let timeout = self.inner.state.config.lock_timeout;
        let Ok(guard) = time::timeout(timeout, lock.lock_owned()).await else {
            log::debug!("lock `{key}` timed out after {timeout:?}");
            return Err(tracerr::map_from(tracerr::new!(
                memory::Error::LockTimeout(key)
            )));
        };

        drop(self.inner.held.lock().insert(key, guard));
        Ok(())
    }

    /// Buffers a write into this [`Tx`].
    pub(super) fn write(&self, f: impl FnOnce(&mut Pending)) {
        f(&mut self.inner.pending.lock());
    }

    /// Commits this [`Tx`].
    ///
    /// All the buffered writes are applied atomically, or none of them if
    /// any unique constraint is violated.
    ///
    /// # Errors
    ///
    /// If the buffered writes violate a unique constraint.
    pub async fn commit(&self) -> Result<(), Traced<database::Error>> {
        let mut tables = self.inner.state.tables.write().await;
        let pending = mem::take(&mut *self.inner.pending.lock());

        if let Some(constraint) = pending.violation(&tables) {
            return Err(tracerr::map_from(tracerr::new!(
                memory::Error::UniqueViolation(constraint)
            )));
        }
        tables.apply(pending);
        drop(tables);

        self.inner.release_locks();
        Ok(())
    }
}

impl Connection for Tx {
    async fn view<R>(&self, f: impl FnOnce(View<'_>) -> R) -> R {
        let tables = self.inner.state.tables.read().await;
        let pending = self.inner.pending.lock();
        f(View::new(&tables, Some(pending.tables())))
    }
}
