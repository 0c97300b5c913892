//! [`Static`] [`Gateway`] implementation.

use std::{collections::HashMap, sync::Arc};

use common::operations::{By, Deliver, Select};
use derive_more::{Display, Error as StdError};
use parking_lot::Mutex;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        charger,
        geo::Place,
        merchant,
        notification::{Notification, Recipient},
        order::{self, PosOrder},
    },
    infra::gateway::{self, Gateway},
};

/// Directory of known places and orders.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    /// Known chargers.
    pub chargers: HashMap<charger::Id, Place>,

    /// Known merchants.
    pub merchants: HashMap<merchant::Id, Place>,

    /// Orders known to the merchants' points of sale.
    pub pos_orders: HashMap<(merchant::Id, order::Number), PosOrder>,
}

/// [`Gateway`] backed by a fixed [`Directory`].
///
/// Delivered [`Notification`]s are logged and kept in an outbox.
#[derive(Clone, Debug, Default)]
pub struct Static {
    /// [`Directory`] to resolve lookups against.
    directory: Arc<Directory>,

    /// Delivered [`Notification`]s.
    outbox: Arc<Mutex<Vec<Notification>>>,
}

impl Static {
    /// Creates a new [`Static`] [`Gateway`] over the provided [`Directory`].
    #[must_use]
    pub fn new(directory: Directory) -> Self {
        Self {
            directory: Arc::new(directory),
            outbox: Arc::default(),
        }
    }

    /// Returns the [`Notification`]s delivered so far.
    #[must_use]
    pub fn outbox(&self) -> Vec<Notification> {
        self.outbox.lock().clone()
    }
}

impl Gateway<Select<By<Option<Place>, charger::Id>>> for Static {
    type Ok = Option<Place>;
    type Err = Traced<gateway::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Place>, charger::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.directory.chargers.get(by.get()).cloned())
    }
}

impl Gateway<Select<By<Option<Place>, merchant::Id>>> for Static {
    type Ok = Option<Place>;
    type Err = Traced<gateway::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Place>, merchant::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.directory.merchants.get(by.get()).cloned())
    }
}

impl Gateway<Select<By<Option<PosOrder>, (merchant::Id, order::Number)>>>
    for Static
{
    type Ok = Option<PosOrder>;
    type Err = Traced<gateway::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<PosOrder>, (merchant::Id, order::Number)>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.directory.pos_orders.get(by.get()).copied())
    }
}

impl Gateway<Deliver<Notification>> for Static {
    type Ok = ();
    type Err = Traced<gateway::Error>;

    async fn execute(
        &self,
        Deliver(notification): Deliver<Notification>,
    ) -> Result<Self::Ok, Self::Err> {
        if let Recipient::Merchant(id) = &notification.recipient {
            if !self.directory.merchants.contains_key(id) {
                return Err(tracerr::map_from(tracerr::new!(
                    Error::UnknownMerchant(id.clone())
                )));
            }
        }

        log::info!(
            "delivered notification to `{}`",
            notification.recipient.describe(),
        );
        self.outbox.lock().push(notification);
        Ok(())
    }
}

/// [`Static`] [`Gateway`] error.
#[derive(Debug, Display, StdError)]
pub enum Error {
    /// Merchant to deliver a [`Notification`] to is not in the [`Directory`].
    #[display("`Merchant(id: {_0})` is not in the directory")]
    UnknownMerchant(#[error(not(source))] merchant::Id),
}
