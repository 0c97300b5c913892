//! Charger definitions.

use std::{str::FromStr, sync::LazyLock};

use derive_more::{AsRef, Display};
use regex::Regex;
use url::Url;

/// ID of a charger registered in the directory.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[as_ref(str)]
pub struct Id(String);

impl Id {
    /// Creates a new [`Id`] if the given `id` is valid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        Self::check(&id).then_some(Self(id))
    }

    /// Checks whether the given `id` is a valid [`Id`].
    fn check(id: impl AsRef<str>) -> bool {
        /// Regular expression checking [`Id`] format.
        static REGEX: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-.]{0,63}$")
                .expect("valid regex")
        });

        REGEX.is_match(id.as_ref())
    }
}

impl FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid charger `Id`")
    }
}

/// Raw content of a QR code scanned at a charger.
///
/// Recognized encodings of a charger [`Id`]:
/// - `charger:<id>`;
/// - URL with a `charger_id` (or `charger`) query parameter;
/// - URL with a `/charger/<id>` (or `/c/<id>`) path;
/// - custom-scheme URL of the form `<scheme>://charger/<id>`;
/// - bare `<id>`.
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str)]
pub struct QrPayload(String);

impl QrPayload {
    /// Maximum length of a [`QrPayload`].
    const MAX_LEN: usize = 2048;

    /// Creates a new [`QrPayload`] if the given `raw` content is not empty
    /// and not too long.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        (!trimmed.is_empty() && trimmed.len() <= Self::MAX_LEN)
            .then(|| Self(trimmed.to_owned()))
    }

    /// Decodes the charger [`Id`] encoded into this [`QrPayload`], if any.
    #[must_use]
    pub fn charger_id(&self) -> Option<Id> {
        let raw = self.0.as_str();

        if let Some(id) = raw.strip_prefix("charger:") {
            return Id::new(id);
        }

        if let Ok(url) = Url::parse(raw) {
            if let Some((_, id)) = url
                .query_pairs()
                .find(|(k, _)| k == "charger_id" || k == "charger")
            {
                return Id::new(id.into_owned());
            }

            let segments =
                url.path_segments().map(Iterator::collect::<Vec<_>>);
            let segments = segments.unwrap_or_default();

            if url.host_str() == Some("charger") {
                return segments.first().and_then(|id| Id::new(*id));
            }

            return segments
                .windows(2)
                .find(|w| matches!(w[0], "charger" | "c"))
                .and_then(|w| Id::new(w[1]));
        }

        Id::new(raw)
    }
}
