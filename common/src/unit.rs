//! Marker types tagging [`DateTimeOf`] moments.
//!
//! [`DateTimeOf`]: crate::DateTimeOf

/// Marker type describing an entity creation.
#[derive(Clone, Copy, Debug)]
pub struct Creation;

/// Marker type describing an entity expiration.
#[derive(Clone, Copy, Debug)]
pub struct Expiration;

/// Marker type describing a successful verification.
#[derive(Clone, Copy, Debug)]
pub struct Verification;

/// Marker type describing a redemption.
#[derive(Clone, Copy, Debug)]
pub struct Redemption;

/// Marker type describing a confirmation by a counterparty.
#[derive(Clone, Copy, Debug)]
pub struct Confirmation;

/// Marker type describing a release of something held back.
#[derive(Clone, Copy, Debug)]
pub struct Release;

/// Marker type describing a cancellation.
#[derive(Clone, Copy, Debug)]
pub struct Cancellation;
