//! [`Command`] for triggering the release of a [`QueuedOrder`] by the
//! driver's proximity.

use common::operations::{By, Select};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        geo::{Coordinates, Distance, Geofence, Place, Proximity},
        merchant,
        order::{Eta, ReleaseArtifact},
        session::{self, Status},
        Session,
    },
    infra::{gateway, Gateway},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};
#[cfg(doc)]
use crate::domain::QueuedOrder;

use super::{release_order, touch_session, Command, ReleaseOrder, TouchSession};

/// [`Command`] for releasing the [`QueuedOrder`] of a [`Session`] once the
/// driver is within the merchant's radius.
///
/// The [`QueuedOrder`] is always released immediately on a trigger, so the
/// [`Eta`] only describes how long the driver will wait at the merchant.
#[derive(Clone, Copy, Debug)]
pub struct TriggerOrder {
    /// ID of the [`Session`] to trigger the release of.
    pub session_id: session::Id,

    /// Reported location of the driver.
    pub location: Coordinates,
}

/// Output of [`TriggerOrder`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// Measured distance to the merchant.
    pub distance: Distance,

    /// Estimate of the fulfillment, if the driver is close enough.
    pub eta: Option<Eta>,

    /// [`ReleaseArtifact`] of the released [`QueuedOrder`], if any.
    pub artifact: Option<ReleaseArtifact>,
}

impl<Db, Gw> Command<TriggerOrder> for Service<Db, Gw>
where
    Self: Command<
            TouchSession,
            Ok = Session,
            Err = Traced<touch_session::ExecutionError>,
        > + Command<
            ReleaseOrder,
            Ok = Option<ReleaseArtifact>,
            Err = Traced<release_order::ExecutionError>,
        >,
    Gw: Gateway<
        Select<By<Option<Place>, merchant::Id>>,
        Ok = Option<Place>,
        Err = Traced<gateway::Error>,
    >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: TriggerOrder) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let TriggerOrder {
            session_id,
            location,
        } = cmd;

        let session = self
            .execute(TouchSession { session_id })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        match session.status {
            Status::Expired => {
                return Err(tracerr::new!(E::SessionExpired(session_id)));
            }
            s if s.is_terminal() => {
                return Err(tracerr::new!(E::WrongStatus(s)));
            }
            _ => {}
        }

        let place = self
            .gateway()
            .execute(Select(By::<Option<Place>, _>::new(
                session.merchant_id.clone(),
            )))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .ok_or_else(|| E::MerchantNotExists(session.merchant_id.clone()))
            .map_err(tracerr::wrap!())?;

        let proximity = Geofence {
            center: place.location,
            radius: self.config().geofence.merchant_radius(),
        }
        .measure(&location);
        let distance = match proximity {
            Proximity::Outside(distance) => {
                log::debug!(
                    "driver of `Session(id: {session_id})` is {distance} away \
                     from the merchant",
                );
                return Ok(Output {
                    distance,
                    eta: None,
                    artifact: None,
                });
            }
            Proximity::Inside(distance) => distance,
        };

        let config = &self.config().order;
        let eta = Eta::estimate(distance, config.walking_speed_mps, config.prep_time);
        let artifact = self
            .execute(ReleaseOrder { session_id })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        Ok(Output {
            distance,
            eta: Some(eta),
            artifact,
        })
    }
}

/// Error of [`TriggerOrder`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Gateway`] error.
    #[display("`Gateway` operation failed: {_0}")]
    Gateway(gateway::Error),

    /// [`TouchSession`] error.
    #[display("Failed to read `Session`: {_0}")]
    Touch(touch_session::ExecutionError),

    /// [`ReleaseOrder`] error.
    #[display("Failed to release order: {_0}")]
    Release(release_order::ExecutionError),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] is finished already.
    #[display("Order of `Session` in `{_0}` status cannot be triggered")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),

    /// Merchant is unknown.
    #[display("Merchant `{_0}` does not exist")]
    #[from(ignore)]
    MerchantNotExists(#[error(not(source))] merchant::Id),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Gateway(_) => return Rejection::transient(self),
            Self::Touch(e) => return e.as_rejection(),
            Self::Release(e) => return e.as_rejection(),
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
            Self::MerchantNotExists(_) => Reason::MerchantNotFound,
        };
        Rejection::new(reason, self)
    }
}
