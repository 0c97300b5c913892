//! [`Command`] for settling a [`Session`] on the merchant's confirmation.

use common::{
    operations::{By, Commit, Insert, Lock, Select, Transact, Transacted, Update},
    Cents, DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        billing::Totals,
        session::{self, ArrivalCode, BillingStatus, Status},
        BillingEvent, Session,
    },
    infra::{
        database::{self, constraint},
        Database,
    },
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, retry_on_contention, Command, ExpiringTx};

/// [`Command`] for confirming the fulfillment of a [`Session`] by its
/// merchant, settling the platform's commission.
///
/// At most one [`BillingEvent`] is ever created per [`Session`], and
/// repeated confirmations return the existing one.
#[derive(Clone, Debug)]
pub struct ConfirmMerchant {
    /// [`SessionRef`] of the [`Session`] to confirm.
    pub session: SessionRef,

    /// Order total reported by the merchant.
    pub merchant_reported_total: Option<Cents>,
}

/// Reference to a [`Session`] known by a merchant.
#[derive(Clone, Debug, From)]
pub enum SessionRef {
    /// [`Session`] ID.
    Id(session::Id),

    /// [`ArrivalCode`] issued to the [`Session`].
    Code(ArrivalCode),
}

/// Output of [`ConfirmMerchant`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// Settled [`Session`].
    pub session: Session,

    /// Issued [`BillingEvent`], if any total was resolved.
    pub billing: Option<BillingEvent>,

    /// Indicator whether the [`Session`] was settled before.
    pub already_confirmed: bool,
}

/// [`Database`] transaction able to settle a [`Session`].
pub trait SettlingTx:
    ExpiringTx
    + Database<
        Lock<By<Session, session::Id>>,
        Ok = (),
        Err = Traced<database::Error>,
    > + Database<
        Select<By<Option<Session>, session::Id>>,
        Ok = Option<Session>,
        Err = Traced<database::Error>,
    > + Database<
        Select<By<Option<BillingEvent>, session::Id>>,
        Ok = Option<BillingEvent>,
        Err = Traced<database::Error>,
    > + Database<Insert<BillingEvent>, Ok = (), Err = Traced<database::Error>>
{
}

impl<T> SettlingTx for T where
    T: ExpiringTx
        + Database<
            Lock<By<Session, session::Id>>,
            Ok = (),
            Err = Traced<database::Error>,
        > + Database<
            Select<By<Option<Session>, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        > + Database<
            Select<By<Option<BillingEvent>, session::Id>>,
            Ok = Option<BillingEvent>,
            Err = Traced<database::Error>,
        > + Database<Insert<BillingEvent>, Ok = (), Err = Traced<database::Error>>
{
}

impl<Db, Gw> Command<ConfirmMerchant> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>
        + for<'c> Database<
            Select<By<Option<Session>, &'c ArrivalCode>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
    Transacted<Db>: SettlingTx,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: ConfirmMerchant,
    ) -> Result<Self::Ok, Self::Err> {
        // A concurrently created `BillingEvent` is observed on retry.
        retry_on_contention(
            || self.settle(&cmd),
            |e| {
                matches!(e, ExecutionError::Db(db) if db.is_contention()
                    || db.is_unique_violation(Some(constraint::BILLING_EVENT)))
            },
        )
        .await
    }
}

impl<Db, Gw> Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>
        + for<'c> Database<
            Select<By<Option<Session>, &'c ArrivalCode>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
    Transacted<Db>: SettlingTx,
{
    /// Makes a single attempt to settle the [`Session`] of the provided
    /// [`ConfirmMerchant`] [`Command`].
    async fn settle(
        &self,
        cmd: &ConfirmMerchant,
    ) -> Result<Output, Traced<ExecutionError>> {
        use ExecutionError as E;

        let session_id = match &cmd.session {
            SessionRef::Id(id) => *id,
            SessionRef::Code(code) => {
                self.database()
                    .execute(Select(By::<Option<Session>, _>::new(code)))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?
                    .ok_or_else(|| E::CodeNotExists(code.clone()))
                    .map_err(tracerr::wrap!())?
                    .id
            }
        };

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Serialize concurrent confirmations of the same `Session`.
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

        match session.status {
            Status::Completed => {
                let billing = tx
                    .execute(Select(By::<Option<BillingEvent>, _>::new(
                        session_id,
                    )))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?;
                log::debug!("`Session(id: {session_id})` is settled already");
                return Ok(Output {
                    session,
                    billing,
                    already_confirmed: true,
                });
            }
            Status::CompletedUnbillable => {
                log::debug!("`Session(id: {session_id})` is settled already");
                return Ok(Output {
                    session,
                    billing: None,
                    already_confirmed: true,
                });
            }
            Status::CodeRedeemed | Status::MerchantConfirmed => {}
            s @ (Status::PendingPairing
            | Status::PendingOrder
            | Status::PendingVerification
            | Status::Verified
            | Status::CodeGenerated
            | Status::Expired
            | Status::Canceled) => {
                return Err(tracerr::new!(E::WrongStatus(s)));
            }
        }

        let now = DateTime::now();
        session
            .transition(
                &[Status::CodeRedeemed, Status::MerchantConfirmed],
                Status::MerchantConfirmed,
            )
            .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
        session.merchant_confirmed_at = Some(now.coerce());

        let totals = Totals {
            pos: session.order.as_ref().and_then(|o| o.pos_total),
            merchant_reported: cmd.merchant_reported_total,
            driver_reported: session
                .order
                .as_ref()
                .and_then(|o| o.estimated_total),
        };
        let billing = if let Some((order_total, total_source)) =
            totals.resolve()
        {
            let policy = self.config().billing.policy();
            let event = BillingEvent {
                session_id,
                merchant_id: session.merchant_id.clone(),
                order_total,
                fee_rate: policy.rate,
                billable: policy.fee(order_total),
                total_source,
                created_at: now.coerce(),
            };
            session
                .transition(&[Status::MerchantConfirmed], Status::Completed)
                .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
            session.billable = Some(event.billable);
            session.billing_status = BillingStatus::Billed;

            tx.execute(Insert(event.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            Some(event)
        } else {
            session
                .transition(
                    &[Status::MerchantConfirmed],
                    Status::CompletedUnbillable,
                )
                .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
            session.billing_status = BillingStatus::Unbillable;
            None
        };

        tx.execute(Update(session.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        if let Some(event) = &billing {
            log::info!(
                "`BillingEvent` of {} on {} total from `{}` created for \
                 `Session(id: {session_id})`",
                event.billable,
                event.order_total,
                event.total_source,
            );
        } else {
            log::info!("`Session(id: {session_id})` completed as unbillable");
        }
        Ok(Output {
            session,
            billing,
            already_confirmed: false,
        })
    }
}

/// Error of [`ConfirmMerchant`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// No [`Session`] holds the [`ArrivalCode`].
    #[display("Code `{_0}` does not exist")]
    #[from(ignore)]
    CodeNotExists(#[error(not(source))] ArrivalCode),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] has not redeemed its code yet.
    #[display("`Session` in `{_0}` status cannot be confirmed")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) => return Rejection::transient(self),
            Self::CodeNotExists(_) => Reason::CodeNotFound,
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
