//! [`Command`] for activating a paired [`Session`].

use common::{
    operations::{By, Commit, Lock, Select, Transact, Transacted, Update},
    DateTime,
};
use derive_more::{Display, Error, From};
use secrecy::{ExposeSecret as _, SecretBox};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        driver::{self, Phone},
        session::{self, pairing::Claims, Flow, Status},
        Session,
    },
    infra::{counters, database, Database},
    rate_limit::{Bucket, Decision, Denial, Identity},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, slot_occupant, Command, SlotTx};

/// [`Command`] for linking a [`Session`] paired by a [`Claims`] to an
/// authenticated driver.
#[derive(Clone, Debug)]
pub struct ActivateSession {
    /// [`Claims`] of the redeemed pairing token.
    pub claims: Claims,

    /// ID of the authenticated driver.
    pub driver_id: driver::Id,

    /// Verified [`Phone`] of the authenticated driver.
    pub phone: SecretBox<Phone>,
}

impl<Db, Gw> Command<ActivateSession> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>
        + Database<
            Select<By<Option<Session>, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
    Transacted<Db>: SlotTx
        + Database<
            Lock<By<Session, (driver::Id, Flow)>>,
            Ok = (),
            Err = Traced<database::Error>,
        >,
{
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: ActivateSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let ActivateSession {
            claims,
            driver_id,
            phone,
        } = cmd;
        let session_id = claims.session_id;
        let identity_hash = phone.expose_secret().hash();
        let identity = Identity::Phone(identity_hash.clone());

        let decision = self
            .rate_limiter()
            .check(&identity, Bucket::PairingActivate)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Decision::Denied(denial) = decision {
            return Err(tracerr::new!(E::RateLimited(denial)));
        }

        if !claims.accepts(&identity_hash) {
            self.rate_limiter()
                .record(&identity, Bucket::PairingActivate, false)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            log::warn!(
                "`{identity}` attempted to activate foreign \
                 `Session(id: {session_id})`",
            );
            return Err(tracerr::new!(E::IdentityMismatch(session_id)));
        }

        let flow = self
            .database()
            .execute(Select(By::<Option<Session>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::SessionNotExists(session_id))
            .map_err(tracerr::wrap!())?
            .flow;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Avoid concurrent activations of the same driver in the same `Flow`.
        tx.execute(Lock(By::<Session, _>::new((driver_id, flow))))
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
        if expire_if_due(&tx, &mut session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            return Err(tracerr::new!(E::SessionExpired(session_id)));
        }

        if session.status == Status::Expired {
            return Err(tracerr::new!(E::SessionExpired(session_id)));
        }
        match session.driver_id {
            Some(id) if id != driver_id => {
                return Err(tracerr::new!(E::AlreadyPaired(session_id)));
            }
            Some(_) if session.is_active() => {
                log::debug!(
                    "`Session(id: {session_id})` is activated by \
                     `Driver(id: {driver_id})` already",
                );
                return Ok(session);
            }
            Some(_) | None => {}
        }
        if claims.expires_at.has_passed(DateTime::now()) {
            return Err(tracerr::new!(E::TokenExpired));
        }

        if let Some(other) = slot_occupant(&tx, (driver_id, flow))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            return Err(tracerr::new!(E::ActiveSessionExists(other.id)));
        }

        session
            .transition(&[Status::PendingPairing], Status::PendingVerification)
            .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
        session.driver_id = Some(driver_id);

        tx.execute(Update(session.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if let Err(e) = self
            .rate_limiter()
            .record(&identity, Bucket::PairingActivate, true)
            .await
        {
            log::warn!("failed to record activation by `{identity}`: {e}");
        }

        log::info!(
            "`Session(id: {session_id})` paired with `Driver(id: {driver_id})`",
        );
        Ok(session)
    }
}

/// Error of [`ActivateSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Rate limiting counters error.
    #[display("Rate limiting failed: {_0}")]
    Counters(counters::Error),

    /// Activation is denied by the rate limiter.
    #[display("Activation is rate limited: {}", _0.reason)]
    #[from(ignore)]
    RateLimited(#[error(not(source))] Denial),

    /// Authenticated identity differs from the one the pairing was started
    /// by.
    #[display("Identity doesn't match the pairing of `Session(id: {_0})`")]
    #[from(ignore)]
    IdentityMismatch(#[error(not(source))] session::Id),

    /// Pairing token has expired.
    #[display("Pairing token has expired")]
    TokenExpired,

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] is paired with another driver.
    #[display("`Session(id: {_0})` is paired with another driver")]
    #[from(ignore)]
    AlreadyPaired(#[error(not(source))] session::Id),

    /// Driver has another active [`Session`] in the same [`Flow`].
    #[display("Driver already has active `Session(id: {_0})`")]
    #[from(ignore)]
    ActiveSessionExists(#[error(not(source))] session::Id),

    /// [`Session`] is not waiting for pairing.
    #[display("`Session` in `{_0}` status cannot be activated")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) | Self::Counters(_) => {
                return Rejection::transient(self);
            }
            Self::RateLimited(denial) => {
                return Rejection::denied(*denial, self);
            }
            Self::ActiveSessionExists(id) => {
                return Rejection::new(Reason::ActiveSessionExists, self)
                    .with_existing_session(*id);
            }
            Self::IdentityMismatch(_) => Reason::IdentityMismatch,
            Self::TokenExpired => Reason::TokenExpired,
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::AlreadyPaired(_) => Reason::AlreadyPaired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
