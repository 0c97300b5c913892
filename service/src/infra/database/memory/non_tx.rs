//! [`NonTx`] client definitions.

use std::sync::Arc;

use super::{Connection, State, View};

/// Non-transactional in-memory database client.
///
/// Sees the committed rows only.
#[derive(Clone, Debug)]
pub struct NonTx {
    /// Shared [`State`] of the database.
    pub(super) state: Arc<State>,
}

impl NonTx {
    /// Creates a new [`NonTx`] client over the provided [`State`].
    pub(super) fn new(state: Arc<State>) -> Self {
        Self { state }
    }
}

impl Connection for NonTx {
    async fn view<R>(&self, f: impl FnOnce(View<'_>) -> R) -> R {
        let tables = self.state.tables.read().await;
        f(View::new(&tables, None))
    }
}
