//! [`Session`] read model definition.

#[cfg(doc)]
use crate::domain::Session;

/// Wrapper around [`Session`] indicating that it [`is_active()`].
///
/// [`is_active()`]: Session::is_active
#[derive(Clone, Debug)]
pub struct Active<T>(pub T);

impl<T> Active<T> {
    /// Unwraps this [`Active`] wrapper.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}
