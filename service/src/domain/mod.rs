//! Domain definitions.

pub mod billing;
pub mod charger;
pub mod driver;
pub mod geo;
pub mod merchant;
pub mod notification;
pub mod order;
pub mod session;

pub use self::{
    billing::BillingEvent, notification::Notification, order::QueuedOrder,
    session::Session,
};
