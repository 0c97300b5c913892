//! [`Command`] for looking up the active [`Session`] of a driver.

use common::{
    operations::{By, Select},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;

use crate::{
    domain::{driver, Session},
    infra::{database, Database},
    read::session::Active,
    rejection::{AsRejection, Rejection},
    Service,
};

use super::{touch_session, Command, TouchSession};

/// [`Command`] for looking up the most recent active [`Session`] of a driver.
///
/// Overdue [`Session`]s met on the way are flipped into
/// [`session::Status::Expired`] and skipped.
///
/// [`session::Status::Expired`]: crate::domain::session::Status::Expired
#[derive(Clone, Copy, Debug)]
pub struct GetActiveSession {
    /// ID of the driver to look up the [`Session`] of.
    pub driver_id: driver::Id,
}

impl<Db, Gw> Command<GetActiveSession> for Service<Db, Gw>
where
    Db: Database<
        Select<By<Option<Active<Session>>, driver::Id>>,
        Ok = Option<Active<Session>>,
        Err = Traced<database::Error>,
    >,
    Self: Command<
        TouchSession,
        Ok = Session,
        Err = Traced<touch_session::ExecutionError>,
    >,
{
    type Ok = Option<Session>;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: GetActiveSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let GetActiveSession { driver_id } = cmd;

        loop {
            let Some(Active(session)) = self
                .database()
                .execute(Select(By::<Option<Active<Session>>, _>::new(
                    driver_id,
                )))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
            else {
                return Ok(None);
            };
            if !session.is_expired(DateTime::now()) {
                return Ok(Some(session));
            }

            let session = self
                .execute(TouchSession {
                    session_id: session.id,
                })
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if session.is_active() {
                return Ok(Some(session));
            }
        }
    }
}

/// Error of [`GetActiveSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`TouchSession`] error.
    #[display("Failed to expire `Session`: {_0}")]
    Touch(touch_session::ExecutionError),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        match self {
            Self::Db(_) => Rejection::transient(self),
            Self::Touch(e) => e.as_rejection(),
        }
    }
}
