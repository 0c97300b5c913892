//! [`Command`] for canceling a [`Session`].

use common::{
    operations::{By, Commit, Lock, Select, Transact, Transacted, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        driver,
        session::{self, Status},
        QueuedOrder, Session,
    },
    infra::{database, Database},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{cancel_queued_order, expire_if_due, Command, ExpiringTx};

/// [`Command`] for canceling a [`Session`] along with its [`QueuedOrder`].
#[derive(Clone, Copy, Debug)]
pub struct CancelSession {
    /// ID of the [`Session`] to cancel.
    pub session_id: session::Id,

    /// ID of the driver canceling the [`Session`], if the [`Session`] is
    /// canceled on behalf of one.
    pub driver_id: Option<driver::Id>,
}

/// Output of [`CancelSession`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// Canceled [`Session`].
    pub session: Session,

    /// [`QueuedOrder`] canceled along with the [`Session`].
    pub order: Option<QueuedOrder>,
}

impl<Db, Gw> Command<CancelSession> for Service<Db, Gw>
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
        >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: CancelSession) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CancelSession {
            session_id,
            driver_id,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Lock(By::<Session, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut session = tx
            .execute(Select(By::<Option<Session>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::SessionNotExists(session_id))
            .map_err(tracerr::wrap!())?;
        if let (Some(actor), Some(owner)) = (driver_id, session.driver_id) {
            if actor != owner {
                return Err(tracerr::new!(E::NotOwner(session_id)));
            }
        }
        if expire_if_due(&tx, &mut session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            return Err(tracerr::new!(E::SessionExpired(session_id)));
        }

        match session.status {
            Status::Canceled => {
                log::debug!("`Session(id: {session_id})` is canceled already");
                return Ok(Output {
                    session,
                    order: None,
                });
            }
            Status::Expired => {
                return Err(tracerr::new!(E::SessionExpired(session_id)));
            }
            _ => {}
        }

        session
            .cancel(DateTime::now().coerce())
            .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
        let order = cancel_queued_order(&tx, session_id)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        tx.execute(Update(session.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        log::info!("`Session(id: {session_id})` canceled");
        Ok(Output { session, order })
    }
}

/// Error of [`CancelSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] belongs to another driver.
    #[display("`Session(id: {_0})` belongs to another driver")]
    #[from(ignore)]
    NotOwner(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] is finished already.
    #[display("`Session` in `{_0}` status cannot be canceled")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) => return Rejection::transient(self),
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::NotOwner(_) => Reason::IdentityMismatch,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
