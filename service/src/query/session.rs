//! [`Query`] collection related to a single [`Session`].

use common::operations::By;

use crate::{
    domain::{
        driver,
        session::{self, ArrivalCode, PairingCode},
        Session,
    },
    read::session::Active,
};
#[cfg(doc)]
use crate::Query;

use super::DatabaseQuery;

/// Queries a [`Session`] by its [`session::Id`].
pub type ById = DatabaseQuery<By<Option<Session>, session::Id>>;

/// Queries a [`Session`] by its [`ArrivalCode`].
pub type ByArrivalCode<'c> = DatabaseQuery<By<Option<Session>, &'c ArrivalCode>>;

/// Queries an active [`Session`] by the [`PairingCode`] it displays.
pub type ByPairingCode<'c> = DatabaseQuery<By<Option<Session>, &'c PairingCode>>;

/// Queries the latest [`Active`] [`Session`] of a driver.
///
/// Overdue sessions are returned as is, see [`GetActiveSession`] for the
/// expiring lookup.
///
/// [`GetActiveSession`]: crate::command::GetActiveSession
pub type ActiveByDriver = DatabaseQuery<By<Option<Active<Session>>, driver::Id>>;
