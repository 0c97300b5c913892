//! Human-enterable codes issued to a [`Session`].

use derive_more::{AsRef, Display};
use rand::Rng;

#[cfg(doc)]
use super::Session;

/// Alphabet of the generated codes.
///
/// Excludes characters easily confused when read aloud or typed: `0`, `O`,
/// `1`, `I` and `L`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generates a random string of `len` characters from the [`ALPHABET`].
fn random<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// Checks whether all the characters of `s` belong to the [`ALPHABET`].
fn is_in_alphabet(s: &str) -> bool {
    s.bytes().all(|b| ALPHABET.contains(&b))
}

/// One-time code proving the driver's arrival, in `NVR-XXXX` format.
///
/// Unique among non-terminal [`Session`]s.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(str)]
pub struct ArrivalCode(String);

impl ArrivalCode {
    /// Prefix of every [`ArrivalCode`].
    pub const PREFIX: &'static str = "NVR-";

    /// Number of random characters in an [`ArrivalCode`].
    pub const LEN: usize = 4;

    /// Generates a new random [`ArrivalCode`].
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(format!("{}{}", Self::PREFIX, random(rng, Self::LEN)))
    }

    /// Parses an [`ArrivalCode`] as typed by a human.
    ///
    /// Case and surrounding whitespace are ignored, the prefix is optional.
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Option<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        let body = code.strip_prefix(Self::PREFIX).unwrap_or(&code);
        (body.len() == Self::LEN && is_in_alphabet(body))
            .then(|| Self(format!("{}{body}", Self::PREFIX)))
    }
}

/// Short code displayed by an in-vehicle browser, which a phone may type in
/// instead of scanning the pairing QR code.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(str)]
pub struct PairingCode(String);

impl PairingCode {
    /// Number of characters in a [`PairingCode`].
    pub const LEN: usize = 6;

    /// Generates a new random [`PairingCode`].
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(random(rng, Self::LEN))
    }

    /// Parses a [`PairingCode`] as typed by a human.
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Option<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        (code.len() == Self::LEN && is_in_alphabet(&code)).then_some(Self(code))
    }
}
