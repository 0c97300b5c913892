//! Pairing of an anonymous [`Session`] with a driver.

use common::{unit, DateTimeOf};
use derive_more::{AsRef, Display, FromStr};
use serde::{Deserialize, Serialize};

#[cfg(doc)]
use common::DateTime;

use crate::domain::driver::IdentityHash;

#[cfg(doc)]
use super::Session;
use super::{Id, PairingCode};

/// Pairing state of a [`Session`] started anonymously.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pairing {
    /// [`IdentityHash`] the pairing [`Token`] is bound to, if any.
    ///
    /// QR pairing started from an in-vehicle browser doesn't know the driver
    /// upfront, so its [`Token`] may be activated by any authenticated driver.
    pub identity_hash: Option<IdentityHash>,

    /// [`DateTime`] when the issued pairing [`Token`] expires.
    pub token_expires_at: TokenExpirationDateTime,

    /// [`PairingCode`] to be displayed alongside the QR code, if any.
    pub code: Option<PairingCode>,
}

/// Signed short-lived token linking a [`Session`] to a pairing party.
#[derive(AsRef, Clone, Debug, Display, Eq, FromStr, PartialEq)]
#[as_ref(str)]
pub struct Token(String);

impl Token {
    /// Creates a new [`Token`] without checking its contents.
    ///
    /// # Safety
    ///
    /// The provided `token` must be a valid [`Token`] representation.
    #[expect(unsafe_code, reason = "bypass")]
    #[must_use]
    pub const unsafe fn new_unchecked(token: String) -> Self {
        Self(token)
    }
}

/// Claims embedded into a pairing [`Token`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Claims {
    /// ID of the [`Session`] to be paired.
    #[serde(rename = "sid")]
    pub session_id: Id,

    /// [`IdentityHash`] of the party the [`Session`] was started by, if any.
    #[serde(rename = "idh", default, skip_serializing_if = "Option::is_none")]
    pub identity_hash: Option<IdentityHash>,

    /// [`DateTime`] when the [`Token`] expires.
    #[serde(rename = "exp", with = "common::datetime::serde::unix_timestamp")]
    pub expires_at: TokenExpirationDateTime,
}

impl Claims {
    /// Checks whether these [`Claims`] accept the provided [`IdentityHash`] of
    /// an authenticated party.
    #[must_use]
    pub fn accepts(&self, identity: &IdentityHash) -> bool {
        self.identity_hash.as_ref().map_or(true, |h| h == identity)
    }
}

/// [`DateTime`] of a pairing [`Token`] expiration.
pub type TokenExpirationDateTime = DateTimeOf<(Token, unit::Expiration)>;

#[cfg(test)]
mod spec {
    use crate::domain::{driver::Phone, session};

    use super::{Claims, TokenExpirationDateTime};

    #[test]
    fn unbound_claims_accept_anyone() {
        let claims = Claims {
            session_id: session::Id::new(),
            identity_hash: None,
            expires_at: TokenExpirationDateTime::now(),
        };

        assert!(claims.accepts(&Phone::new("+15550001234").unwrap().hash()));
    }

    #[test]
    fn bound_claims_accept_only_same_identity() {
        let phone = Phone::new("+15550001234").unwrap();
        let claims = Claims {
            session_id: session::Id::new(),
            identity_hash: Some(phone.hash()),
            expires_at: TokenExpirationDateTime::now(),
        };

        assert!(claims.accepts(&phone.hash()));
        assert!(!claims.accepts(&Phone::new("+15550009999").unwrap().hash()));
    }
}
