//! [`Gateway`]-related implementations.
//!
//! [`Gateway`] covers the external collaborators the service consumes
//! through narrow contracts: charger and merchant directory, point of sale
//! and notification delivery.

pub mod r#static;

use derive_more::{Display, Error as StdError, From};

pub use self::r#static::Static;

/// External gateway operation.
pub use common::Handler as Gateway;

/// [`Gateway`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// [`Static`] error.
    Static(r#static::Error),
}
