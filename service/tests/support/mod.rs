//! Fixtures shared by the integration tests.

#![allow(dead_code, reason = "not every test binary uses every fixture")]

use std::collections::HashMap;

use common::Cents;
use secrecy::SecretBox;
use service::{
    command::{
        verify_arrival, ActivateSession, CreateSession, GenerateCode,
        RedeemPairingToken, StartPairing, VerifyArrival,
    },
    domain::{
        charger, driver,
        driver::Phone,
        geo::{Coordinates, Place},
        merchant,
        order::{self, PosOrder, PosStatus},
        session::{ArrivalCode, Client, Entry, Flow, IdempotencyKey, Method},
        Session,
    },
    infra::{gateway::r#static::Directory, Memory, Static},
    Command as _, Config, Service,
};

/// [`Service`] under test.
pub type TestService = Service<Memory, Static>;

/// Number of the order known to the point of sale.
pub const POS_ORDER: &str = "P-100";

/// Total of the order known to the point of sale.
pub const POS_TOTAL: Cents = Cents::new(4_200);

pub fn merchant_id() -> merchant::Id {
    merchant::Id::new("m_blue_bottle").unwrap()
}

pub fn charger_id() -> charger::Id {
    charger::Id::new("ch_hayes_01").unwrap()
}

pub fn charger_location() -> Coordinates {
    Coordinates::new(37.776_5, -122.423_4).unwrap()
}

pub fn merchant_location() -> Coordinates {
    Coordinates::new(37.777_1, -122.422_5).unwrap()
}

pub fn directory() -> Directory {
    Directory {
        chargers: HashMap::from([(
            charger_id(),
            Place {
                name: "Hayes Valley Supercharger".into(),
                location: charger_location(),
            },
        )]),
        merchants: HashMap::from([(
            merchant_id(),
            Place {
                name: "Blue Bottle".into(),
                location: merchant_location(),
            },
        )]),
        pos_orders: HashMap::from([(
            (merchant_id(), order::Number::new(POS_ORDER).unwrap()),
            PosOrder {
                total: POS_TOTAL,
                status: PosStatus::Paid,
            },
        )]),
    }
}

pub fn config() -> Config {
    Config::with_secret(b"integration-test-secret")
}

pub fn service() -> TestService {
    service_with(config())
}

pub fn service_with(config: Config) -> TestService {
    // Background tasks are never polled in tests.
    let (service, _) = Service::new(
        config,
        Memory::default(),
        Static::new(directory()),
        None,
    );
    service
}

pub fn phone() -> Phone {
    Phone::new("+15550001234").unwrap()
}

pub fn secret_phone() -> SecretBox<Phone> {
    SecretBox::new(Box::new(phone()))
}

pub fn entry(flow: Flow, driver_id: Option<driver::Id>) -> Entry {
    Entry {
        idempotency_key: None,
        driver_id,
        merchant_id: merchant_id(),
        charger_id: Some(charger_id()),
        flow,
        client: Client::Web,
        vehicle: None,
    }
}

pub fn keyed_entry(driver_id: driver::Id, key: &str) -> Entry {
    Entry {
        idempotency_key: IdempotencyKey::new(key),
        ..entry(Flow::Authenticated, Some(driver_id))
    }
}

/// Creates an authenticated [`Session`] waiting for the verification.
pub async fn authenticated(service: &TestService) -> Session {
    service
        .execute(CreateSession {
            entry: entry(Flow::Authenticated, Some(driver::Id::new())),
            pre_order: false,
        })
        .await
        .unwrap()
}

/// Verifies the provided [`Session`] at the charger's exact location.
pub async fn verify_at_charger(
    service: &TestService,
    session: &Session,
) -> verify_arrival::Output {
    service
        .execute(VerifyArrival {
            session_id: session.id,
            method: Method::DeviceGeofence,
            location: Some(charger_location()),
            qr_payload: None,
        })
        .await
        .unwrap()
}

/// Drives a new authenticated [`Session`] up to an issued [`ArrivalCode`].
pub async fn with_code(service: &TestService) -> (Session, ArrivalCode) {
    let session = authenticated(service).await;
    _ = verify_at_charger(service, &session).await;
    let out = service
        .execute(GenerateCode {
            session_id: session.id,
        })
        .await
        .unwrap();
    (out.session, out.code)
}

/// Pairs a new phone-first [`Session`] with a new driver.
pub async fn paired_phone_first(service: &TestService) -> Session {
    let started = service
        .execute(StartPairing {
            entry: entry(Flow::PhoneFirst, None),
            phone: Some(secret_phone()),
            ip: None,
        })
        .await
        .unwrap();
    let redeemed = service
        .execute(RedeemPairingToken::Token(started.token))
        .await
        .unwrap();
    service
        .execute(ActivateSession {
            claims: redeemed.claims,
            driver_id: driver::Id::new(),
            phone: secret_phone(),
        })
        .await
        .unwrap()
}
