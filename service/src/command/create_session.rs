//! [`Command`] for creating a [`Session`].

use common::operations::{By, Commit, Insert, Lock, Select, Transact, Transacted};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        charger, driver,
        geo::Place,
        merchant,
        session::{self, Entry, Flow, IdempotencyKey, Status},
        Session,
    },
    infra::{database, gateway, Database, Gateway},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{slot_occupant, Command, SlotTx};

/// [`Command`] for creating a [`Session`] of an authenticated driver.
///
/// Anonymous entry flows are started by a [`StartPairing`] instead.
///
/// [`StartPairing`]: super::StartPairing
#[derive(Clone, Debug)]
pub struct CreateSession {
    /// [`Entry`] metadata of the [`Session`].
    pub entry: Entry,

    /// Whether an order is to be bound before the arrival verification.
    pub pre_order: bool,
}

impl<Db, Gw> Command<CreateSession> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>,
    Transacted<Db>: CreatingTx,
    Gw: Gateway<
            Select<By<Option<Place>, merchant::Id>>,
            Ok = Option<Place>,
            Err = Traced<gateway::Error>,
        > + Gateway<
            Select<By<Option<Place>, charger::Id>>,
            Ok = Option<Place>,
            Err = Traced<gateway::Error>,
        >,
{
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: CreateSession) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CreateSession { entry, pre_order } = cmd;

        if entry.flow.requires_pairing() {
            return Err(tracerr::new!(E::PairingRequired(entry.flow)));
        }
        if entry.driver_id.is_none() {
            return Err(tracerr::new!(E::DriverRequired));
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

        let initial = if pre_order {
            Status::PendingOrder
        } else {
            Status::PendingVerification
        };
        let ttl = self.config().session.ttl(entry.flow);
        let session = Session::new(entry, initial, ttl);

        match create(self.database(), session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            Creation::Created(s) | Creation::Existing(s) => Ok(s),
            Creation::Conflict(existing) => {
                Err(tracerr::new!(E::ActiveSessionExists(existing)))
            }
        }
    }
}

/// [`Database`] transaction able to insert a new [`Session`] guarding its
/// uniqueness.
pub trait CreatingTx:
    for<'k> Database<
        Lock<By<Session, &'k IdempotencyKey>>,
        Ok = (),
        Err = Traced<database::Error>,
    > + for<'k> Database<
        Select<By<Option<Session>, &'k IdempotencyKey>>,
        Ok = Option<Session>,
        Err = Traced<database::Error>,
    > + Database<
        Lock<By<Session, (driver::Id, Flow)>>,
        Ok = (),
        Err = Traced<database::Error>,
    > + Database<Insert<Session>, Ok = (), Err = Traced<database::Error>>
    + SlotTx
{
}

impl<T> CreatingTx for T where
    T: for<'k> Database<
            Lock<By<Session, &'k IdempotencyKey>>,
            Ok = (),
            Err = Traced<database::Error>,
        > + for<'k> Database<
            Select<By<Option<Session>, &'k IdempotencyKey>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        > + Database<
            Lock<By<Session, (driver::Id, Flow)>>,
            Ok = (),
            Err = Traced<database::Error>,
        > + Database<Insert<Session>, Ok = (), Err = Traced<database::Error>>
        + SlotTx
{
}

/// Outcome of a [`create()`]ion.
#[derive(Debug)]
pub(crate) enum Creation {
    /// New [`Session`] has been created.
    Created(Session),

    /// [`Session`] with the same [`IdempotencyKey`] exists already.
    Existing(Session),

    /// Driver has another active [`Session`] in the same [`Flow`].
    Conflict(session::Id),
}

/// Inserts the provided new [`Session`], unless a [`Session`] with the same
/// [`IdempotencyKey`] exists already or its driver has another live
/// [`Session`] in the same [`Flow`].
///
/// An overdue [`Session`] holding the driver's slot is expired along the
/// way.
pub(crate) async fn create<Db>(
    db: &Db,
    session: Session,
) -> Result<Creation, Traced<database::Error>>
where
    Db: Database<Transact, Err = Traced<database::Error>>,
    Transacted<Db>: CreatingTx,
{
    let tx = db.execute(Transact).await.map_err(tracerr::wrap!())?;

    if let Some(key) = &session.idempotency_key {
        // Serialize the retries of the same request.
        tx.execute(Lock(By::<Session, _>::new(key)))
            .await
            .map_err(tracerr::wrap!())?;

        let existing = tx
            .execute(Select(By::<Option<Session>, _>::new(key)))
            .await
            .map_err(tracerr::wrap!())?;
        if let Some(existing) = existing {
            log::debug!(
                "`Session(id: {})` exists for idempotency key `{key}`",
                existing.id,
            );
            return Ok(Creation::Existing(existing));
        }
    }

    if let Some(driver_id) = session.driver_id {
        let slot = (driver_id, session.flow);
        tx.execute(Lock(By::<Session, _>::new(slot)))
            .await
            .map_err(tracerr::wrap!())?;

        if let Some(active) = slot_occupant(&tx, slot)
            .await
            .map_err(tracerr::wrap!())?
        {
            // Keep the expirations met on the way.
            tx.execute(Commit).await.map_err(tracerr::wrap!())?;
            return Ok(Creation::Conflict(active.id));
        }
    }

    tx.execute(Insert(session.clone()))
        .await
        .map_err(tracerr::wrap!())?;
    tx.execute(Commit).await.map_err(tracerr::wrap!())?;

    log::info!(
        "`Session(id: {})` created via `{}` flow in `{}` status",
        session.id,
        session.flow,
        session.status,
    );
    Ok(Creation::Created(session))
}

/// Error of [`CreateSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Gateway`] error.
    #[display("`Gateway` operation failed: {_0}")]
    Gateway(gateway::Error),

    /// [`Flow`] requires pairing.
    #[display("`{_0}` flow must be started via pairing")]
    #[from(ignore)]
    PairingRequired(#[error(not(source))] Flow),

    /// Authenticated [`Flow`] misses a driver.
    #[display("Authenticated flow requires a driver")]
    DriverRequired,

    /// Merchant is unknown.
    #[display("Merchant `{_0}` does not exist")]
    #[from(ignore)]
    MerchantNotExists(#[error(not(source))] merchant::Id),

    /// Charger is unknown.
    #[display("Charger `{_0}` does not exist")]
    #[from(ignore)]
    ChargerNotExists(#[error(not(source))] charger::Id),

    /// Driver has another active [`Session`] in the same [`Flow`].
    #[display("Driver already has active `Session(id: {_0})`")]
    #[from(ignore)]
    ActiveSessionExists(#[error(not(source))] session::Id),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        match self {
            Self::Db(_) | Self::Gateway(_) => Rejection::transient(self),
            Self::PairingRequired(_) => {
                Rejection::new(Reason::PairingRequired, self)
            }
            Self::DriverRequired => Rejection::new(Reason::DriverRequired, self),
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
