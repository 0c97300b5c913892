//! [`Query`] collection related to a [`BillingEvent`].

use common::operations::By;

use crate::domain::{session, BillingEvent};
#[cfg(doc)]
use crate::{domain::Session, Query};

use super::DatabaseQuery;

/// Queries the [`BillingEvent`] issued for a [`Session`].
pub type BySession = DatabaseQuery<By<Option<BillingEvent>, session::Id>>;
