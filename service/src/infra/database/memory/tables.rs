//! Rows stored by the [`Memory`] database.

use std::collections::{HashMap, HashSet};

use crate::domain::{session, BillingEvent, QueuedOrder, Session};
#[cfg(doc)]
use crate::infra::database::Memory;

use super::constraint;

/// Rows of all the tables, keyed by their primary keys.
#[derive(Clone, Debug, Default)]
pub(super) struct Tables {
    /// [`Session`]s by their IDs.
    sessions: HashMap<session::Id, Session>,

    /// [`QueuedOrder`]s by the IDs of their [`Session`]s.
    orders: HashMap<session::Id, QueuedOrder>,

    /// [`BillingEvent`]s by the IDs of their [`Session`]s.
    billing: HashMap<session::Id, BillingEvent>,
}

impl Tables {
    /// Applies the provided [`Pending`] writes to these [`Tables`].
    pub(super) fn apply(&mut self, pending: Pending) {
        let Pending { tables, .. } = pending;
        self.sessions.extend(tables.sessions);
        self.orders.extend(tables.orders);
        self.billing.extend(tables.billing);
    }
}

/// Writes buffered by a transaction.
#[derive(Debug, Default)]
pub(super) struct Pending {
    /// Written rows.
    tables: Tables,

    /// Primary keys of the [`Session`]s inserted rather than updated.
    inserted_sessions: HashSet<session::Id>,

    /// Keys of the [`QueuedOrder`]s inserted rather than updated.
    inserted_orders: HashSet<session::Id>,
}

impl Pending {
    /// Returns the written rows.
    pub(super) fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Buffers a write of the provided [`Session`].
    pub(super) fn put_session(&mut self, session: Session, insert: bool) {
        if insert {
            _ = self.inserted_sessions.insert(session.id);
        }
        _ = self.tables.sessions.insert(session.id, session);
    }

    /// Buffers a write of the provided [`QueuedOrder`].
    pub(super) fn put_order(&mut self, order: QueuedOrder, insert: bool) {
        if insert {
            _ = self.inserted_orders.insert(order.session_id);
        }
        _ = self.tables.orders.insert(order.session_id, order);
    }

    /// Buffers an insert of the provided [`BillingEvent`].
    pub(super) fn put_billing(&mut self, event: BillingEvent) {
        _ = self.tables.billing.insert(event.session_id, event);
    }

    /// Checks these [`Pending`] writes against the `committed` [`Tables`],
    /// returning the name of the first violated unique constraint, if any.
    pub(super) fn violation(&self, committed: &Tables) -> Option<&'static str> {
        if self
            .inserted_sessions
            .iter()
            .any(|id| committed.sessions.contains_key(id))
        {
            return Some(constraint::SESSION_ID);
        }
        if self
            .inserted_orders
            .iter()
            .any(|id| committed.orders.contains_key(id))
        {
            return Some(constraint::QUEUED_ORDER);
        }
        // Billing events are insert-only.
        if self
            .tables
            .billing
            .keys()
            .any(|id| committed.billing.contains_key(id))
        {
            return Some(constraint::BILLING_EVENT);
        }

        let view = View {
            committed,
            pending: Some(&self.tables),
        };
        for written in self.tables.sessions.values() {
            for other in view.sessions().filter(|s| s.id != written.id) {
                if written.idempotency_key.is_some()
                    && written.idempotency_key == other.idempotency_key
                {
                    return Some(constraint::IDEMPOTENCY_KEY);
                }
                if !written.is_active() || !other.is_active() {
                    continue;
                }
                if written.arrival_code.is_some()
                    && written.arrival_code == other.arrival_code
                {
                    return Some(constraint::ARRIVAL_CODE);
                }
                if written.driver_id.is_some()
                    && written.driver_id == other.driver_id
                    && written.flow == other.flow
                {
                    return Some(constraint::ACTIVE_SLOT);
                }
            }
        }
        None
    }
}

/// Rows visible to a [`Memory`] client: the committed ones overlaid with the
/// writes of the current transaction, if any.
#[derive(Clone, Copy, Debug)]
pub struct View<'t> {
    /// Committed rows.
    committed: &'t Tables,

    /// Rows written by the current transaction.
    pending: Option<&'t Tables>,
}

impl<'t> View<'t> {
    /// Creates a new [`View`] of the `committed` rows overlaid with the
    /// `pending` ones.
    pub(super) fn new(committed: &'t Tables, pending: Option<&'t Tables>) -> Self {
        Self { committed, pending }
    }

    /// Returns the [`Session`] with the provided ID.
    #[must_use]
    pub fn session(&self, id: &session::Id) -> Option<&'t Session> {
        self.pending
            .and_then(|p| p.sessions.get(id))
            .or_else(|| self.committed.sessions.get(id))
    }

    /// Iterates over all the visible [`Session`]s.
    pub fn sessions(&self) -> impl Iterator<Item = &'t Session> + 't {
        let pending = self.pending;
        pending
            .into_iter()
            .flat_map(|p| p.sessions.values())
            .chain(self.committed.sessions.values().filter(move |s| {
                pending.map_or(true, |p| !p.sessions.contains_key(&s.id))
            }))
    }

    /// Returns the [`QueuedOrder`] of the [`Session`] with the provided ID.
    #[must_use]
    pub fn order(&self, session_id: &session::Id) -> Option<&'t QueuedOrder> {
        self.pending
            .and_then(|p| p.orders.get(session_id))
            .or_else(|| self.committed.orders.get(session_id))
    }

    /// Returns the [`BillingEvent`] of the [`Session`] with the provided ID.
    #[must_use]
    pub fn billing(&self, session_id: &session::Id) -> Option<&'t BillingEvent> {
        self.pending
            .and_then(|p| p.billing.get(session_id))
            .or_else(|| self.committed.billing.get(session_id))
    }
}
