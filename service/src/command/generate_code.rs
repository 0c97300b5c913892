//! [`Command`] for generating an [`ArrivalCode`].

use common::{
    operations::{By, Commit, Lock, Select, Transact, Transacted, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, ArrivalCode, CodeExpirationDateTime, Status},
        Session,
    },
    infra::{
        database::{self, constraint},
        Database,
    },
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, Command, ExpiringTx};

/// [`Command`] for issuing a one-time [`ArrivalCode`] to a verified
/// [`Session`].
///
/// A live [`ArrivalCode`] is returned as is, while an expired one is
/// replaced.
#[derive(Clone, Copy, Debug)]
pub struct GenerateCode {
    /// ID of the [`Session`] to issue the [`ArrivalCode`] to.
    pub session_id: session::Id,
}

impl GenerateCode {
    /// [`Status`]es an [`ArrivalCode`] may be issued in.
    const ISSUABLE: &'static [Status] =
        &[Status::Verified, Status::CodeGenerated];

    /// Maximum number of attempts to pick an [`ArrivalCode`] not used by any
    /// other active [`Session`].
    const MAX_ATTEMPTS: usize = 5;
}

/// Output of [`GenerateCode`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// [`Session`] the [`ArrivalCode`] is issued to.
    pub session: Session,

    /// Issued [`ArrivalCode`].
    pub code: ArrivalCode,

    /// [`DateTime`] when the [`ArrivalCode`] stops being redeemable.
    pub expires_at: CodeExpirationDateTime,
}

impl<Db, Gw> Command<GenerateCode> for Service<Db, Gw>
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
        > + for<'c> Database<
            Select<By<Option<Session>, &'c ArrivalCode>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: GenerateCode) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let GenerateCode { session_id } = cmd;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let tx = self
                .database()
                .execute(Transact)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;

            // Avoid issuing two codes to the same `Session` concurrently.
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

            let now = DateTime::now();
            if session.status == Status::CodeGenerated
                && session.has_live_code(now)
            {
                if let (Some(code), Some(expires_at)) =
                    (session.arrival_code.clone(), session.code_expires_at)
                {
                    log::debug!(
                        "`Session(id: {session_id})` has a live code already",
                    );
                    return Ok(Output {
                        session,
                        code,
                        expires_at,
                    });
                }
            }
            if !GenerateCode::ISSUABLE.contains(&session.status) {
                return Err(tracerr::new!(E::WrongStatus(session.status)));
            }

            let mut code = None;
            for _ in 0..GenerateCode::MAX_ATTEMPTS {
                let candidate = ArrivalCode::generate(&mut rand::thread_rng());
                let holder = tx
                    .execute(Select(By::<Option<Session>, _>::new(&candidate)))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?;
                if !holder.is_some_and(|s| s.is_active() && s.id != session_id) {
                    code = Some(candidate);
                    break;
                }
            }
            let code = code
                .ok_or(E::CodeSpaceExhausted)
                .map_err(tracerr::wrap!())?;
            let expires_at =
                (now + self.config().session.code_ttl).coerce();

            session
                .transition(GenerateCode::ISSUABLE, Status::CodeGenerated)
                .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
            session.arrival_code = Some(code.clone());
            session.code_expires_at = Some(expires_at);

            tx.execute(Update(session.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            match tx.execute(Commit).await {
                Ok(()) => {}
                // Another `Session` took the same code concurrently.
                Err(e)
                    if e.as_ref()
                        .is_unique_violation(Some(constraint::ARRIVAL_CODE))
                        && attempt < GenerateCode::MAX_ATTEMPTS =>
                {
                    log::warn!(
                        "regenerating code of `Session(id: {session_id})`: {e}",
                    );
                    continue;
                }
                Err(e) => {
                    return Err(e).map_err(tracerr::map_from_and_wrap!(=> E));
                }
            }

            log::info!("`Session(id: {session_id})` issued code `{code}`");
            return Ok(Output {
                session,
                code,
                expires_at,
            });
        }
    }
}

/// Error of [`GenerateCode`] [`Command`] execution.
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

    /// [`Session`] is not verified, or has redeemed its code already.
    #[display("Code cannot be issued to `Session` in `{_0}` status")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),

    /// No unused [`ArrivalCode`] has been picked.
    #[display("Failed to pick an unused arrival code")]
    CodeSpaceExhausted,
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) | Self::CodeSpaceExhausted => {
                return Rejection::transient(self);
            }
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
