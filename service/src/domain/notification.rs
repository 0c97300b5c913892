//! [`Notification`] definitions.

use secrecy::{ExposeSecret as _, SecretBox};

use crate::domain::{driver::Phone, merchant};

/// Message delivered to a party outside the platform.
#[derive(Clone, Debug)]
pub struct Notification {
    /// [`Recipient`] of this [`Notification`].
    pub recipient: Recipient,

    /// Rendered text of this [`Notification`].
    pub message: String,
}

/// Recipient of a [`Notification`].
#[derive(Clone, Debug)]
pub enum Recipient {
    /// Driver reachable by an SMS.
    Phone(SecretBox<Phone>),

    /// Merchant reachable through its order channel.
    Merchant(merchant::Id),
}

impl Recipient {
    /// Returns a loggable description of this [`Recipient`].
    ///
    /// Raw phone numbers are replaced by their hashes.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Phone(phone) => format!("phone:{}", phone.expose_secret().hash()),
            Self::Merchant(id) => format!("merchant:{id}"),
        }
    }
}

impl PartialEq for Recipient {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Phone(a), Self::Phone(b)) => {
                a.expose_secret() == b.expose_secret()
            }
            (Self::Merchant(a), Self::Merchant(b)) => a == b,
            (Self::Phone(_) | Self::Merchant(_), _) => false,
        }
    }
}

#[cfg(test)]
mod spec {
    use secrecy::SecretBox;

    use crate::domain::driver::Phone;

    use super::Recipient;

    #[test]
    fn description_hides_raw_phone() {
        let phone = Phone::new("+15550001234").unwrap();
        let recipient = Recipient::Phone(SecretBox::new(Box::new(phone)));

        let described = recipient.describe();
        assert!(described.starts_with("phone:"));
        assert!(!described.contains("5550001234"));
        assert!(!format!("{recipient:?}").contains("5550001234"));
    }
}
