//! [`Command`] for starting a [`Pairing`] of an anonymous [`Session`].

use std::net::IpAddr;

use common::{
    operations::{By, Deliver, Select, Transact, Transacted},
    DateTime,
};
use derive_more::{Display, Error, From};
use secrecy::{ExposeSecret as _, SecretBox};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        charger,
        driver::Phone,
        geo::Place,
        merchant,
        notification::{self, Notification},
        session::{
            self, pairing, Entry, Flow, Pairing, PairingCode, Status,
        },
        Session,
    },
    infra::{counters, database, gateway, Database, Gateway},
    rate_limit::{Bucket, Decision, Denial, Identity},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{
    create_session::{create, Creation, CreatingTx},
    touch_session, Command, TouchSession,
};

/// [`Command`] for starting a [`Pairing`] of an anonymous [`Session`].
#[derive(Clone, Debug)]
pub struct StartPairing {
    /// [`Entry`] metadata of the [`Session`].
    ///
    /// Any driver ID is ignored, as the driver is linked on activation.
    pub entry: Entry,

    /// [`Phone`] the pairing is started for.
    ///
    /// Required for the [`Flow::PhoneFirst`].
    pub phone: Option<SecretBox<Phone>>,

    /// IP address of the client starting the pairing.
    pub ip: Option<IpAddr>,
}

/// Output of [`StartPairing`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// [`Session`] waiting for the pairing.
    pub session: Session,

    /// Pairing [`pairing::Token`].
    pub token: pairing::Token,

    /// [`PairingCode`] to be displayed alongside the QR code, if any.
    pub code: Option<PairingCode>,
}

impl<Db, Gw> Command<StartPairing> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>
        + for<'k> Database<
            Select<By<Option<Session>, &'k session::IdempotencyKey>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
    Transacted<Db>: CreatingTx,
    Gw: Gateway<
            Select<By<Option<Place>, merchant::Id>>,
            Ok = Option<Place>,
            Err = Traced<gateway::Error>,
        > + Gateway<
            Select<By<Option<Place>, charger::Id>>,
            Ok = Option<Place>,
            Err = Traced<gateway::Error>,
        > + Gateway<Deliver<Notification>, Ok = (), Err = Traced<gateway::Error>>,
    Self: Command<
        TouchSession,
        Ok = Session,
        Err = Traced<touch_session::ExecutionError>,
    >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: StartPairing) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let StartPairing {
            mut entry,
            phone,
            ip,
        } = cmd;
        entry.driver_id = None;

        if !entry.flow.requires_pairing() {
            return Err(tracerr::new!(E::PairingUnsupported(entry.flow)));
        }
        if entry.flow == Flow::PhoneFirst && phone.is_none() {
            return Err(tracerr::new!(E::PhoneRequired));
        }

        if let Some(key) = &entry.idempotency_key {
            let existing = self
                .database()
                .execute(Select(By::<Option<Session>, _>::new(key)))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            if let Some(session) = existing {
                log::debug!(
                    "`Session(id: {})` exists for idempotency key `{key}`",
                    session.id,
                );
                return self.resume(session).await;
            }
        }

        let identity_hash = phone.as_ref().map(|p| p.expose_secret().hash());
        let identities = identity_hash
            .clone()
            .map(Identity::Phone)
            .into_iter()
            .chain(ip.map(Identity::Ip))
            .collect::<Vec<_>>();
        let decision = self
            .rate_limiter()
            .check_all(&identities, Bucket::PairingStart)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Decision::Denied(denial) = decision {
            log::info!("pairing start denied: {}", denial.reason);
            return Err(tracerr::new!(E::RateLimited(denial)));
        }

        _ = self
            .gateway()
            .execute(Select(By::<Option<Place>, _>::new(
                entry.merchant_id.clone(),
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::MerchantNotExists(entry.merchant_id.clone()))
            .map_err(tracerr::wrap!())?;
        if let Some(charger_id) = &entry.charger_id {
            _ = self
                .gateway()
                .execute(Select(By::<Option<Place>, _>::new(charger_id.clone())))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
                .ok_or_else(|| E::ChargerNotExists(charger_id.clone()))
                .map_err(tracerr::wrap!())?;
        }

        let config = &self.config().session;
        let flow = entry.flow;
        let mut session =
            Session::new(entry, Status::PendingPairing, config.ttl(flow));
        session.pairing = Some(Pairing {
            identity_hash,
            token_expires_at: (DateTime::now() + config.pairing_token_ttl)
                .coerce(),
            code: (flow == Flow::QrPairing)
                .then(|| PairingCode::generate(&mut rand::thread_rng())),
        });

        let session = match create(self.database(), session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            Creation::Created(s) => s,
            Creation::Existing(s) => return self.resume(s).await,
            // Anonymous sessions have no driver to conflict with.
            Creation::Conflict(id) => {
                return Err(tracerr::new!(E::ActiveSessionExists(id)));
            }
        };
        let output = self.reissue(session).map_err(tracerr::wrap!())?;

        for identity in &identities {
            if let Err(e) = self
                .rate_limiter()
                .record(identity, Bucket::PairingStart, true)
                .await
            {
                log::warn!("failed to record pairing start by `{identity}`: {e}");
            }
        }

        if let Some(phone) = phone {
            let notification = Notification {
                recipient: notification::Recipient::Phone(phone),
                message: format!(
                    "Tap to link your charging session: {}",
                    output.token.as_ref(),
                ),
            };
            if let Err(e) = self.gateway().execute(Deliver(notification)).await {
                log::warn!(
                    "failed to deliver pairing SMS for `Session(id: {})`: {e}",
                    output.session.id,
                );
            }
        }

        Ok(output)
    }
}

impl<Db, Gw> Service<Db, Gw>
where
    Self: Command<
        TouchSession,
        Ok = Session,
        Err = Traced<touch_session::ExecutionError>,
    >,
{
    /// Resumes the [`Pairing`] of the provided [`Session`] found by the
    /// idempotency key of a retried request, unless the [`Session`] is over.
    async fn resume(
        &self,
        session: Session,
    ) -> Result<Output, Traced<ExecutionError>> {
        use ExecutionError as E;

        let session = self
            .execute(TouchSession {
                session_id: session.id,
            })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        match session.status {
            Status::Expired => {
                return Err(tracerr::new!(E::SessionExpired(session.id)));
            }
            s if s.is_terminal() => {
                return Err(tracerr::new!(E::WrongStatus(s)));
            }
            _ => {}
        }
        self.reissue(session).map_err(tracerr::wrap!())
    }
}

impl<Db, Gw> Service<Db, Gw> {
    /// Issues a pairing [`pairing::Token`] of the provided [`Session`] out of
    /// its [`Pairing`] state.
    ///
    /// The same [`Pairing`] state always produces the same token.
    fn reissue(&self, session: Session) -> Result<Output, ExecutionError> {
        let Some(p) = &session.pairing else {
            return Err(ExecutionError::PairingUnsupported(session.flow));
        };
        let claims = pairing::Claims {
            session_id: session.id,
            identity_hash: p.identity_hash.clone(),
            expires_at: p.token_expires_at,
        };
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &self.config().jwt_encoding_key,
        )?;

        // SAFETY: `jsonwebtoken::encode` always returns a valid
        //         `pairing::Token`.
        #[expect(unsafe_code, reason = "invariants are preserved")]
        let token = unsafe { pairing::Token::new_unchecked(token) };

        Ok(Output {
            code: p.code.clone(),
            token,
            session,
        })
    }
}

/// Error of [`StartPairing`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Gateway`] error.
    #[display("`Gateway` operation failed: {_0}")]
    Gateway(gateway::Error),

    /// Rate limiting counters error.
    #[display("Rate limiting failed: {_0}")]
    Counters(counters::Error),

    /// [`TouchSession`] error.
    #[display("Failed to read `Session`: {_0}")]
    Touch(touch_session::ExecutionError),

    /// [`jsonwebtoken`] encoding error.
    #[display("Failed to encode a JSON Web Token: {_0}")]
    JsonWebTokenEncodeError(jsonwebtoken::errors::Error),

    /// [`Flow`] doesn't support pairing.
    #[display("`{_0}` flow doesn't support pairing")]
    #[from(ignore)]
    PairingUnsupported(#[error(not(source))] Flow),

    /// [`Flow::PhoneFirst`] misses a [`Phone`].
    #[display("Phone-first flow requires a phone number")]
    PhoneRequired,

    /// Pairing start is denied by the rate limiter.
    #[display("Pairing start is rate limited: {}", _0.reason)]
    #[from(ignore)]
    RateLimited(#[error(not(source))] Denial),

    /// Merchant is unknown.
    #[display("Merchant `{_0}` does not exist")]
    #[from(ignore)]
    MerchantNotExists(#[error(not(source))] merchant::Id),

    /// Charger is unknown.
    #[display("Charger `{_0}` does not exist")]
    #[from(ignore)]
    ChargerNotExists(#[error(not(source))] charger::Id),

    /// [`Session`] of the retried request has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] of the retried request is finished already.
    #[display("Pairing of `Session` in `{_0}` status cannot be resumed")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),

    /// Conflicting active [`Session`] exists.
    #[display("Active `Session(id: {_0})` exists already")]
    #[from(ignore)]
    ActiveSessionExists(#[error(not(source))] session::Id),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        match self {
            Self::Db(_)
            | Self::Gateway(_)
            | Self::Counters(_)
            | Self::JsonWebTokenEncodeError(_) => Rejection::transient(self),
            Self::Touch(e) => e.as_rejection(),
            Self::SessionExpired(_) => {
                Rejection::new(Reason::SessionExpired, self)
            }
            Self::WrongStatus(_) => Rejection::new(Reason::InvalidState, self),
            Self::PairingUnsupported(_) => {
                Rejection::new(Reason::PairingUnsupported, self)
            }
            Self::PhoneRequired => Rejection::new(Reason::PhoneRequired, self),
            Self::RateLimited(denial) => Rejection::denied(*denial, self),
            Self::MerchantNotExists(_) => {
                Rejection::new(Reason::MerchantNotFound, self)
            }
            Self::ChargerNotExists(_) => {
                Rejection::new(Reason::ChargerNotFound, self)
            }
            Self::ActiveSessionExists(id) => {
                Rejection::new(Reason::ActiveSessionExists, self)
                    .with_existing_session(*id)
            }
        }
    }
}
