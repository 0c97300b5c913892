//! [`Query`] collection related to a [`QueuedOrder`].

use common::operations::By;

use crate::domain::{session, QueuedOrder};
#[cfg(doc)]
use crate::{domain::Session, Query};

use super::DatabaseQuery;

/// Queries the [`QueuedOrder`] of a [`Session`].
pub type BySession = DatabaseQuery<By<Option<QueuedOrder>, session::Id>>;
