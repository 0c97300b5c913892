//! [`Command`] for reading a [`Session`] with the lazy expiry applied.

use common::operations::{By, Lock, Select, Transact, Transacted};
use derive_more::{Display, Error, From};
use tracerr::Traced;

use crate::{
    domain::{session, Session},
    infra::{database, Database},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, Command, ExpiringTx};

/// [`Command`] for reading a [`Session`], flipping it into
/// [`session::Status::Expired`] first if its time-to-live has lapsed.
///
/// The only operation an overdue [`Session`] doesn't reject.
#[derive(Clone, Copy, Debug)]
pub struct TouchSession {
    /// ID of the [`Session`] to read.
    pub session_id: session::Id,
}

impl<Db, Gw> Command<TouchSession> for Service<Db, Gw>
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
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: TouchSession) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let TouchSession { session_id } = cmd;

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
        _ = expire_if_due(&tx, &mut session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        Ok(session)
    }
}

/// Error of [`TouchSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        match self {
            Self::Db(_) => Rejection::transient(self),
            Self::SessionNotExists(_) => {
                Rejection::new(Reason::SessionNotFound, self)
            }
        }
    }
}
