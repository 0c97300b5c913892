//! [`Command`] definition.

pub mod activate_session;
pub mod bind_order;
pub mod cancel_session;
pub mod confirm_merchant;
pub mod create_session;
pub mod generate_code;
pub mod get_active_session;
pub mod redeem_code;
pub mod redeem_pairing_token;
pub mod release_order;
pub mod start_pairing;
pub mod touch_session;
pub mod trigger_order;
pub mod verify_arrival;

use std::{fmt, future::Future};

use common::{
    operations::{By, Commit, Lock, Select, Update},
    DateTime,
};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{driver, session, QueuedOrder, Session},
    infra::{database, Database},
    read::session::Active,
};

/// [`Command`] of the [`Service`].
///
/// [`Service`]: crate::Service
pub use common::Handler as Command;

pub use self::{
    activate_session::ActivateSession, bind_order::BindOrder,
    cancel_session::CancelSession, confirm_merchant::ConfirmMerchant,
    create_session::CreateSession, generate_code::GenerateCode,
    get_active_session::GetActiveSession, redeem_code::RedeemCode,
    redeem_pairing_token::RedeemPairingToken, release_order::ReleaseOrder,
    start_pairing::StartPairing, touch_session::TouchSession,
    trigger_order::TriggerOrder, verify_arrival::VerifyArrival,
};

/// [`Database`] transaction able to expire a [`Session`] along with its
/// [`QueuedOrder`].
pub trait ExpiringTx:
    Database<
        Select<By<Option<QueuedOrder>, session::Id>>,
        Ok = Option<QueuedOrder>,
        Err = Traced<database::Error>,
    > + Database<Update<QueuedOrder>, Ok = (), Err = Traced<database::Error>>
    + Database<Update<Session>, Ok = (), Err = Traced<database::Error>>
    + Database<Commit, Ok = (), Err = Traced<database::Error>>
{
}

impl<T> ExpiringTx for T where
    T: Database<
            Select<By<Option<QueuedOrder>, session::Id>>,
            Ok = Option<QueuedOrder>,
            Err = Traced<database::Error>,
        > + Database<Update<QueuedOrder>, Ok = (), Err = Traced<database::Error>>
        + Database<Update<Session>, Ok = (), Err = Traced<database::Error>>
        + Database<Commit, Ok = (), Err = Traced<database::Error>>
{
}

/// Flips the provided locked [`Session`] into [`session::Status::Expired`]
/// and commits the transaction, if its time-to-live has lapsed.
///
/// Returns whether the [`Session`] has been expired.
async fn expire_if_due<Tx: ExpiringTx>(
    tx: &Tx,
    session: &mut Session,
) -> Result<bool, Traced<database::Error>> {
    if !mark_expired_if_due(tx, session)
        .await
        .map_err(tracerr::wrap!())?
    {
        return Ok(false);
    }
    tx.execute(Commit).await.map_err(tracerr::wrap!())?;

    log::info!("`Session(id: {})` expired", session.id);
    Ok(true)
}

/// Buffers the expiration of the provided locked [`Session`] along with its
/// [`QueuedOrder`] into the transaction, if its time-to-live has lapsed.
///
/// Returns whether the [`Session`] has been expired.
async fn mark_expired_if_due<Tx: ExpiringTx>(
    tx: &Tx,
    session: &mut Session,
) -> Result<bool, Traced<database::Error>> {
    if !session.is_expired(DateTime::now()) || session.expire().is_err() {
        return Ok(false);
    }

    _ = cancel_queued_order(tx, session.id)
        .await
        .map_err(tracerr::wrap!())?;
    tx.execute(Update(session.clone()))
        .await
        .map_err(tracerr::wrap!())?;
    Ok(true)
}

/// [`Database`] transaction able to free the active slot of a driver held by
/// an overdue [`Session`].
pub trait SlotTx:
    ExpiringTx
    + Database<
        Select<By<Option<Active<Session>>, (driver::Id, session::Flow)>>,
        Ok = Option<Active<Session>>,
        Err = Traced<database::Error>,
    > + Database<
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

impl<T> SlotTx for T where
    T: ExpiringTx
        + Database<
            Select<By<Option<Active<Session>>, (driver::Id, session::Flow)>>,
            Ok = Option<Active<Session>>,
            Err = Traced<database::Error>,
        > + Database<
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

/// Returns the live [`Session`] occupying the provided locked slot of a
/// driver.
///
/// Overdue [`Session`]s met on the way are expired within the transaction,
/// so they are committed along with the caller's writes.
async fn slot_occupant<Tx: SlotTx>(
    tx: &Tx,
    slot: (driver::Id, session::Flow),
) -> Result<Option<Session>, Traced<database::Error>> {
    loop {
        let active = tx
            .execute(Select(By::<Option<Active<Session>>, _>::new(slot)))
            .await
            .map_err(tracerr::wrap!())?;
        let Some(Active(active)) = active else {
            return Ok(None);
        };

        tx.execute(Lock(By::<Session, _>::new(active.id)))
            .await
            .map_err(tracerr::wrap!())?;
        let mut session = tx
            .execute(Select(By::<Option<Session>, _>::new(active.id)))
            .await
            .map_err(tracerr::wrap!())?
            .unwrap_or(active);

        if mark_expired_if_due(tx, &mut session)
            .await
            .map_err(tracerr::wrap!())?
        {
            log::info!(
                "`Session(id: {})` expired, freeing its driver slot",
                session.id,
            );
            continue;
        }
        if session.is_active() {
            return Ok(Some(session));
        }
    }
}

/// Cancels the queued [`QueuedOrder`] of the provided [`Session`], if any.
///
/// Returns the canceled [`QueuedOrder`].
async fn cancel_queued_order<Tx: ExpiringTx>(
    tx: &Tx,
    session_id: session::Id,
) -> Result<Option<QueuedOrder>, Traced<database::Error>> {
    let order = tx
        .execute(Select(By::<Option<QueuedOrder>, _>::new(session_id)))
        .await
        .map_err(tracerr::wrap!())?;
    let Some(mut order) = order else {
        return Ok(None);
    };
    if !order.cancel(DateTime::now().coerce()) {
        return Ok(None);
    }

    tx.execute(Update(order.clone()))
        .await
        .map_err(tracerr::wrap!())?;
    Ok(Some(order))
}

/// Runs the provided `attempt`, retrying it once if it fails on a record lock
/// contention.
async fn retry_on_contention<T, E, F, Fut>(
    mut attempt: F,
    is_contention: impl Fn(&E) -> bool,
) -> Result<T, Traced<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Traced<E>>>,
    E: fmt::Display,
{
    match attempt().await {
        Err(e) if is_contention(e.as_ref()) => {
            log::warn!("retrying after a record lock contention: {e}");
            attempt().await
        }
        res => res,
    }
}
