//! Driver definitions.

use std::sync::LazyLock;

use derive_more::{AsRef, Display, From, FromStr, Into};
use regex::Regex;
use secrecy::{zeroize::Zeroize, CloneableSecret};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

/// ID of an authenticated driver.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    FromStr,
    Hash,
    Into,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Phone number of a driver in [E.164] format.
///
/// This is a raw identity and must never leave the process: only its
/// [`IdentityHash`] is persisted, logged or embedded into tokens.
///
/// [E.164]: https://en.wikipedia.org/wiki/E.164
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str)]
pub struct Phone(String);

impl Phone {
    /// Creates a new [`Phone`] if the given `number` is valid.
    ///
    /// Visual separators (spaces, dashes, dots and parentheses) are stripped
    /// before validation.
    #[must_use]
    pub fn new(number: impl AsRef<str>) -> Option<Self> {
        let number = number
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect::<String>();
        Self::check(&number).then_some(Self(number))
    }

    /// Checks whether the given `number` is a valid [`Phone`].
    fn check(number: impl AsRef<str>) -> bool {
        /// Regular expression checking [E.164] format.
        ///
        /// [E.164]: https://en.wikipedia.org/wiki/E.164
        static REGEX: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^\+[1-9]\d{6,14}$").expect("valid regex")
        });

        REGEX.is_match(number.as_ref())
    }

    /// Returns the [`IdentityHash`] of this [`Phone`].
    #[must_use]
    pub fn hash(&self) -> IdentityHash {
        IdentityHash::of(self.0.as_bytes())
    }
}

impl FromStr for Phone {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `Phone`")
    }
}

impl CloneableSecret for Phone {}
impl Zeroize for Phone {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Hex-encoded SHA-256 hash of a raw identity.
#[derive(
    AsRef, Clone, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[as_ref(str)]
#[serde(transparent)]
pub struct IdentityHash(String);

impl IdentityHash {
    /// Hashes the provided raw identity.
    #[must_use]
    pub fn of(identity: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(Sha256::digest(identity.as_ref())))
    }
}

#[cfg(test)]
mod spec {
    use super::{IdentityHash, Phone};

    #[test]
    fn normalizes_phone() {
        let phone = Phone::new("+1 (555) 000-1234").unwrap();

        assert_eq!(phone.as_ref(), "+15550001234");
    }

    #[test]
    fn rejects_invalid_phone() {
        assert!(Phone::new("5550001234").is_none());
        assert!(Phone::new("+0555000").is_none());
        assert!(Phone::new("+1555abc1234").is_none());
        assert!(Phone::new("").is_none());
    }

    #[test]
    fn hash_never_contains_raw_identity() {
        let phone = Phone::new("+15550001234").unwrap();
        let hash = phone.hash();

        assert_eq!(hash.as_ref().len(), 64);
        assert!(!hash.as_ref().contains("5550001234"));
        assert_eq!(hash, IdentityHash::of("+15550001234"));
        assert_ne!(hash, Phone::new("+15550001235").unwrap().hash());
    }
}
