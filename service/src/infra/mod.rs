//! Infrastructure layer.

pub mod counters;
pub mod database;
pub mod gateway;

pub use self::{
    counters::CounterStore,
    database::{Database, Memory},
    gateway::{Gateway, Static},
};
