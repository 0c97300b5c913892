//! [`Command`] for binding a [`QueuedOrder`] to a [`Session`].

use common::{
    operations::{By, Commit, Insert, Lock, Select, Transact, Transacted, Update},
    Cents, DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        order,
        session::{self, OrderBinding, OrderSource, Status},
        QueuedOrder, Session,
    },
    infra::{database, Database},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, Command, ExpiringTx};

/// [`Command`] for binding a [`QueuedOrder`] to a [`Session`], deferring it
/// until the driver's arrival.
#[derive(Clone, Debug)]
pub struct BindOrder {
    /// ID of the [`Session`] to bind the [`QueuedOrder`] to.
    pub session_id: session::Id,

    /// [`order::Destination`] the [`QueuedOrder`] is released to.
    pub destination: order::Destination,

    /// Merchant-side [`order::Number`], if known.
    pub number: Option<order::Number>,

    /// Opaque order payload.
    pub payload: Option<String>,

    /// Total estimated by the driver.
    pub estimated_total: Option<Cents>,
}

impl BindOrder {
    /// [`Status`]es a [`QueuedOrder`] may be bound in.
    const BINDABLE: &'static [Status] = &[
        Status::PendingOrder,
        Status::PendingVerification,
        Status::Verified,
        Status::CodeGenerated,
    ];
}

impl<Db, Gw> Command<BindOrder> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>,
    Transacted<Db>: ExpiringTx
        + Database<
            Lock<By<Session, session::Id>>,
            Ok = (),
            Err = Traced<database::Error>,
        > + Database<
            Select<By<Option<Session>, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        > + Database<Insert<QueuedOrder>, Ok = (), Err = Traced<database::Error>>,
{
    type Ok = QueuedOrder;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: BindOrder) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let BindOrder {
            session_id,
            destination,
            number,
            payload,
            estimated_total,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Avoid concurrent bindings to the same `Session`.
        tx.execute(Lock(By::<Session, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut session = tx
            .execute(Select(By::<Option<Session>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::SessionNotExists(session_id))
            .map_err(tracerr::wrap!())?;
        if expire_if_due(&tx, &mut session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            || session.status == Status::Expired
        {
            return Err(tracerr::new!(E::SessionExpired(session_id)));
        }

        let existing = tx
            .execute(Select(By::<Option<QueuedOrder>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Some(existing) = existing {
            log::debug!(
                "`Session(id: {session_id})` has `QueuedOrder(id: {})` already",
                existing.id,
            );
            return Ok(existing);
        }

        if !BindOrder::BINDABLE.contains(&session.status) {
            return Err(tracerr::new!(E::WrongStatus(session.status)));
        }
        if session.status == Status::PendingOrder {
            session
                .transition(&[Status::PendingOrder], Status::PendingVerification)
                .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
        }

        let order = QueuedOrder {
            id: order::Id::new(),
            session_id,
            merchant_id: session.merchant_id.clone(),
            destination,
            number: number.clone(),
            payload,
            estimated_total,
            status: order::Status::Queued,
            created_at: DateTime::now().coerce(),
            released_at: None,
            canceled_at: None,
        };
        session.order = Some(OrderBinding {
            number,
            source: OrderSource::Queued,
            pos_total: None,
            estimated_total,
        });

        tx.execute(Insert(order.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Update(session))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        log::info!(
            "`QueuedOrder(id: {})` bound to `Session(id: {session_id})`",
            order.id,
        );
        Ok(order)
    }
}

/// Error of [`BindOrder`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] doesn't accept orders anymore.
    #[display("Order cannot be bound to `Session` in `{_0}` status")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) => return Rejection::transient(self),
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
