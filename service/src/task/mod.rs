//! Background [`Task`]s definitions.

mod background;
pub mod expire_sessions;
pub mod prune_rate_limits;

pub use common::Handler as Task;

pub use self::{
    background::{Background, Stopped}, expire_sessions::ExpireSessions,
    prune_rate_limits::PruneRateLimits,
};
