//! [`Command`] for releasing a [`QueuedOrder`].

use common::{
    operations::{By, Commit, Deliver, Lock, Select, Transact, Transacted, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        notification::{self, Notification},
        order::{self, ReleaseArtifact},
        session::{self, Status},
        QueuedOrder, Session,
    },
    infra::{database, gateway, Database, Gateway},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, Command, ExpiringTx};

/// [`Command`] for releasing the [`QueuedOrder`] of a [`Session`] to its
/// merchant.
///
/// Returns [`None`] if the [`Session`] has no [`QueuedOrder`] to release.
/// Releasing twice returns the original [`ReleaseArtifact`] without
/// notifying the merchant again.
#[derive(Clone, Copy, Debug)]
pub struct ReleaseOrder {
    /// ID of the [`Session`] to release the [`QueuedOrder`] of.
    pub session_id: session::Id,
}

impl<Db, Gw> Command<ReleaseOrder> for Service<Db, Gw>
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
    Gw: Gateway<Deliver<Notification>, Ok = (), Err = Traced<gateway::Error>>,
{
    type Ok = Option<ReleaseArtifact>;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: ReleaseOrder) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ReleaseOrder { session_id } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Avoid releasing the same `QueuedOrder` concurrently.
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

        let Some(mut order) = tx
            .execute(Select(By::<Option<QueuedOrder>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            return Ok(None);
        };
        match order.status {
            order::Status::Released => {
                log::debug!(
                    "`QueuedOrder(id: {})` is released already",
                    order.id,
                );
                return Ok(order.artifact());
            }
            order::Status::Canceled => return Ok(None),
            order::Status::Queued => {}
        }
        if !session.is_active() {
            return Err(tracerr::new!(E::WrongStatus(session.status)));
        }

        let artifact = order.release(DateTime::now().coerce());
        tx.execute(Update(order.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if let Some(artifact) = &artifact {
            log::info!(
                "`QueuedOrder(id: {})` of `Session(id: {session_id})` released",
                order.id,
            );

            let notification = Notification {
                recipient: notification::Recipient::Merchant(
                    order.merchant_id.clone(),
                ),
                message: format!("Driver is on the way: {}", artifact.url),
            };
            if let Err(e) = self.gateway().execute(Deliver(notification)).await {
                log::warn!(
                    "failed to notify merchant of `QueuedOrder(id: {})`: {e}",
                    order.id,
                );
            }
        }

        Ok(artifact)
    }
}

/// Error of [`ReleaseOrder`] [`Command`] execution.
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

    /// [`Session`] is finished without releasing its order.
    #[display("Order of `Session` in `{_0}` status cannot be released")]
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
