//! [`Command`] for redeeming an [`ArrivalCode`].

use common::{
    operations::{By, Commit, Lock, Select, Transact, Transacted, Update},
    Cents, DateTime,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        merchant,
        order::{self, PosOrder},
        session::{self, ArrivalCode, OrderBinding, OrderSource, Status},
        Session,
    },
    infra::{database, gateway, Database, Gateway},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::{expire_if_due, retry_on_contention, Command, ExpiringTx};

/// [`Command`] for redeeming an [`ArrivalCode`] at the merchant.
///
/// Exactly one of concurrent redemptions of the same [`ArrivalCode`]
/// succeeds, while the others observe it as redeemed already.
#[derive(Clone, Debug)]
pub struct RedeemCode {
    /// [`ArrivalCode`] to redeem.
    pub code: ArrivalCode,

    /// Merchant-side [`order::Number`] of the order placed at the counter.
    pub order_number: Option<order::Number>,

    /// Order total reported by the driver.
    pub total: Option<Cents>,
}

/// Output of [`RedeemCode`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// [`Session`] the [`ArrivalCode`] belongs to.
    pub session: Session,

    /// Indicator whether the [`ArrivalCode`] was redeemed before.
    pub already_redeemed: bool,
}

/// [`Database`] transaction able to redeem an [`ArrivalCode`].
pub trait RedeemingTx:
    ExpiringTx
    + Database<
        Lock<By<Session, session::Id>>,
        Ok = (),
        Err = Traced<database::Error>,
    > + Database<
        Select<By<Option<Session>, session::Id>>,
        Ok = Option<Session>,
        Err = Traced<database::Error>,
    >
{
}

impl<T> RedeemingTx for T where
    T: ExpiringTx
        + Database<
            Lock<By<Session, session::Id>>,
            Ok = (),
            Err = Traced<database::Error>,
        > + Database<
            Select<By<Option<Session>, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >
{
}

/// [`Gateway`] able to look up a [`PosOrder`].
pub trait PosGateway:
    Gateway<
    Select<By<Option<PosOrder>, (merchant::Id, order::Number)>>,
    Ok = Option<PosOrder>,
    Err = Traced<gateway::Error>,
>
{
}

impl<T> PosGateway for T where
    T: Gateway<
        Select<By<Option<PosOrder>, (merchant::Id, order::Number)>>,
        Ok = Option<PosOrder>,
        Err = Traced<gateway::Error>,
    >
{
}

impl<Db, Gw> Command<RedeemCode> for Service<Db, Gw>
where
    Db: Database<Transact, Err = Traced<database::Error>>
        + for<'c> Database<
            Select<By<Option<Session>, &'c ArrivalCode>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
    Transacted<Db>: RedeemingTx,
    Gw: PosGateway,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: RedeemCode) -> Result<Self::Ok, Self::Err> {
        retry_on_contention(
            || self.redeem(&cmd),
            |e| matches!(e, ExecutionError::Db(db) if db.is_contention()),
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
    Transacted<Db>: RedeemingTx,
    Gw: PosGateway,
{
    /// Makes a single attempt to redeem the [`ArrivalCode`] of the provided
    /// [`RedeemCode`] [`Command`].
    async fn redeem(
        &self,
        cmd: &RedeemCode,
    ) -> Result<Output, Traced<ExecutionError>> {
        use ExecutionError as E;

        let RedeemCode {
            code,
            order_number,
            total,
        } = cmd;

        let session_id = self
            .database()
            .execute(Select(By::<Option<Session>, _>::new(code)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::CodeNotExists(code.clone()))
            .map_err(tracerr::wrap!())?
            .id;

        let tx = self
            .database()
            .execute(Transact)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // Serialize concurrent redemptions of the same code.
        tx.execute(Lock(By::<Session, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let mut session = tx
            .execute(Select(By::<Option<Session>, _>::new(session_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or(E::SessionNotExists(session_id))
            .map_err(tracerr::wrap!())?;
        // The code may have been replaced while waiting for the lock.
        if session.arrival_code.as_ref() != Some(code) {
            return Err(tracerr::new!(E::CodeNotExists(code.clone())));
        }
        if expire_if_due(&tx, &mut session)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            || session.status == Status::Expired
        {
            return Err(tracerr::new!(E::SessionExpired(session_id)));
        }

        if session.redeemed_at.is_some() {
            log::debug!("code of `Session(id: {session_id})` is redeemed already");
            return Ok(Output {
                session,
                already_redeemed: true,
            });
        }
        if session.status != Status::CodeGenerated {
            return Err(tracerr::new!(E::WrongStatus(session.status)));
        }
        let now = DateTime::now();
        if !session.has_live_code(now) {
            return Err(tracerr::new!(E::CodeExpired(session_id)));
        }

        let pos_total = if let Some(number) = order_number {
            self.gateway()
                .execute(Select(By::<Option<PosOrder>, _>::new((
                    session.merchant_id.clone(),
                    number.clone(),
                ))))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
                .and_then(|o| o.billable_total())
        } else {
            None
        };

        let binding = session.order.get_or_insert(OrderBinding {
            number: None,
            source: OrderSource::Counter,
            pos_total: None,
            estimated_total: None,
        });
        if let Some(number) = order_number {
            binding.number = Some(number.clone());
        }
        if pos_total.is_some() {
            binding.pos_total = pos_total;
        }
        if total.is_some() {
            binding.estimated_total = *total;
        }

        session
            .transition(&[Status::CodeGenerated], Status::CodeRedeemed)
            .map_err(|e| tracerr::new!(E::WrongStatus(e.from)))?;
        session.redeemed_at = Some(now.coerce());

        tx.execute(Update(session.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        tx.execute(Commit)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        log::info!("code of `Session(id: {session_id})` redeemed");
        Ok(Output {
            session,
            already_redeemed: false,
        })
    }
}

/// Error of [`RedeemCode`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Gateway`] error.
    #[display("`Gateway` operation failed: {_0}")]
    Gateway(gateway::Error),

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

    /// [`ArrivalCode`] has expired.
    #[display("Code of `Session(id: {_0})` has expired")]
    #[from(ignore)]
    CodeExpired(#[error(not(source))] session::Id),

    /// [`Session`] is not waiting for a redemption.
    #[display("Code of `Session` in `{_0}` status cannot be redeemed")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) | Self::Gateway(_) => {
                return Rejection::transient(self);
            }
            Self::CodeNotExists(_) => Reason::CodeNotFound,
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::CodeExpired(_) => Reason::CodeExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
