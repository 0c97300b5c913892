//! [`Command`] for verifying a driver's arrival.

use common::operations::{
    By, Commit, Lock, Select, Transact, Transacted, Update,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        charger::{self, QrPayload},
        geo::{Coordinates, Distance, Geofence, Place, Proximity},
        session::{self, Method, Status, Verification},
        Session,
    },
    infra::{database, gateway, Database, Gateway},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, Command, ExpiringTx};

/// [`Command`] for verifying a driver's arrival at the charger of a
/// [`Session`].
///
/// Only the server-computed distance is trusted, never a client's claim of
/// being in place.
#[derive(Clone, Debug)]
pub struct VerifyArrival {
    /// ID of the [`Session`] to verify.
    pub session_id: session::Id,

    /// [`Method`] to verify the arrival with.
    pub method: Method,

    /// Reported location, required by the geofence [`Method`]s.
    pub location: Option<Coordinates>,

    /// Scanned QR payload, required by the [`Method::QrScan`].
    pub qr_payload: Option<QrPayload>,
}

impl VerifyArrival {
    /// [`Status`]es an arrival may be verified in.
    const VERIFIABLE: &'static [Status] =
        &[Status::PendingOrder, Status::PendingVerification];
}

/// Output of [`VerifyArrival`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// Verified [`Session`].
    pub session: Session,

    /// Indicator whether the arrival was verified before.
    pub already_verified: bool,

    /// Measured distance to the charger, if a geofence was checked.
    pub distance: Option<Distance>,
}

/// Accepted verification attempt.
#[derive(Debug)]
struct Verdict {
    /// Measured distance to the charger.
    distance: Option<Distance>,

    /// Charger to be bound to the [`Session`].
    charger_id: Option<charger::Id>,
}

impl<Db, Gw> Command<VerifyArrival> for Service<Db, Gw>
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
    Gw: Gateway<
        Select<By<Option<Place>, charger::Id>>,
        Ok = Option<Place>,
        Err = Traced<gateway::Error>,
    >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: VerifyArrival) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let VerifyArrival {
            session_id,
            method,
            location,
            qr_payload,
        } = cmd;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Avoid concurrent attempts upon the same `Session`.
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

        if session.status.is_past_verification() && session.is_active() {
            log::debug!("`Session(id: {session_id})` is verified already");
            return Ok(Output {
                session,
                already_verified: true,
                distance: None,
            });
        }
        if !VerifyArrival::VERIFIABLE.contains(&session.status) {
            return Err(tracerr::new!(E::WrongStatus(session.status)));
        }

        let max_attempts = self.config().session.max_verification_attempts;
        if session.verification_attempts >= max_attempts {
            return Err(tracerr::new!(E::TooManyAttempts(session_id)));
        }
        session.verification_attempts += 1;

        let verdict = match method {
            Method::DeviceGeofence | Method::PhoneGeofence => {
                match (location, session.charger_id.clone()) {
                    (None, _) => Err(E::LocationRequired),
                    (Some(_), None) => Err(E::ChargerNotBound),
                    (Some(location), Some(charger_id)) => {
                        let place = self
                            .gateway()
                            .execute(Select(By::<Option<Place>, _>::new(
                                charger_id.clone(),
                            )))
                            .await
                            .map_err(tracerr::map_from_and_wrap!(=> E))?;
                        match place {
                            None => Err(E::ChargerNotExists(charger_id)),
                            Some(place) => match (Geofence {
                                center: place.location,
                                radius: self.config().geofence.charger_radius(),
                            })
                            .measure(&location)
                            {
                                Proximity::Inside(d) => Ok(Verdict {
                                    distance: Some(d),
                                    charger_id: None,
                                }),
                                Proximity::Outside(d) => Err(E::TooFar(d)),
                            },
                        }
                    }
                }
            }
            Method::QrScan => {
                match qr_payload.as_ref().map(QrPayload::charger_id) {
                    None => Err(E::QrRequired),
                    Some(None) => Err(E::InvalidQr),
                    Some(Some(scanned)) => match &session.charger_id {
                        Some(bound) if *bound != scanned => {
                            Err(E::ChargerMismatch(scanned))
                        }
                        Some(_) | None => {
                            let place = self
                                .gateway()
                                .execute(Select(By::<Option<Place>, _>::new(
                                    scanned.clone(),
                                )))
                                .await
                                .map_err(tracerr::map_from_and_wrap!(=> E))?;
                            if place.is_some() {
                                Ok(Verdict {
                                    distance: None,
                                    charger_id: Some(scanned),
                                })
                            } else {
                                Err(E::ChargerNotExists(scanned))
                            }
                        }
                    },
                }
            }
        };

        if let Ok(verdict) = &verdict {
            session
                .transition(VerifyArrival::VERIFIABLE, Status::Verified)
                .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
            if let Some(charger_id) = &verdict.charger_id {
                session.charger_id = Some(charger_id.clone());
            }
            session.verification = Some(Verification {
                method,
                verified_at: common::DateTime::now().coerce(),
                location,
            });
        }

        // Rejected attempts are counted too.
        tx.execute(Update(session.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        match verdict {
            Ok(Verdict { distance, .. }) => {
                log::info!(
                    "`Session(id: {session_id})` verified via `{method}`",
                );
                Ok(Output {
                    session,
                    already_verified: false,
                    distance,
                })
            }
            Err(e) => {
                log::debug!(
                    "`Session(id: {session_id})` verification attempt {} \
                     rejected: {e}",
                    session.verification_attempts,
                );
                Err(tracerr::new!(e))
            }
        }
    }
}

/// Error of [`VerifyArrival`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Gateway`] error.
    #[display("`Gateway` operation failed: {_0}")]
    Gateway(gateway::Error),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] cannot be verified in its current [`Status`].
    #[display("`Session` in `{_0}` status cannot be verified")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),

    /// [`Session`] has run out of verification attempts.
    #[display("`Session(id: {_0})` has run out of verification attempts")]
    #[from(ignore)]
    TooManyAttempts(#[error(not(source))] session::Id),

    /// Geofence [`Method`] misses a location.
    #[display("Location is required")]
    LocationRequired,

    /// No charger is bound to the [`Session`].
    #[display("No charger is bound to the `Session`")]
    ChargerNotBound,

    /// [`Method::QrScan`] misses a payload.
    #[display("QR payload is required")]
    QrRequired,

    /// QR payload doesn't encode a charger.
    #[display("QR payload doesn't encode a charger")]
    InvalidQr,

    /// Scanned charger differs from the bound one.
    #[display("Scanned charger `{_0}` differs from the bound one")]
    #[from(ignore)]
    ChargerMismatch(#[error(not(source))] charger::Id),

    /// Charger is unknown.
    #[display("Charger `{_0}` does not exist")]
    #[from(ignore)]
    ChargerNotExists(#[error(not(source))] charger::Id),

    /// Reported location is beyond the geofence.
    #[display("Reported location is {_0} away from the charger")]
    #[from(ignore)]
    TooFar(#[error(not(source))] Distance),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) | Self::Gateway(_) => {
                return Rejection::transient(self);
            }
            Self::TooFar(d) => {
                return Rejection::new(Reason::TooFar, self).with_distance(*d);
            }
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
            Self::TooManyAttempts(_) => Reason::TooManyAttempts,
            Self::LocationRequired => Reason::LocationRequired,
            Self::ChargerNotBound => Reason::ChargerNotBound,
            Self::QrRequired => Reason::QrRequired,
            Self::InvalidQr => Reason::InvalidQr,
            Self::ChargerMismatch(_) => Reason::ChargerMismatch,
            Self::ChargerNotExists(_) => Reason::ChargerNotFound,
        };
        Rejection::new(reason, self)
    }
}
