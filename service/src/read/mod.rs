//! Read entities definitions.

pub mod session;
