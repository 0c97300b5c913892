//! Pairing of anonymous sessions and its rate limiting.

mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::DateTime;
use secrecy::SecretBox;
use service::{
    command::{
        activate_session, start_pairing, ActivateSession, CancelSession,
        CreateSession, RedeemPairingToken, StartPairing,
    },
    domain::{
        driver::{self, Phone},
        notification::Recipient,
        session::{
            pairing::{Claims, TokenExpirationDateTime},
            Entry, Flow, IdempotencyKey, Status,
        },
    },
    infra::{
        counters::{self, Failure, Hit},
        CounterStore, Memory, Static,
    },
    query,
    rejection::{Kind, Reason},
    AsRejection as _, Command as _, Service,
};
use tracerr::Traced;

use self::support::{
    config, directory, entry, secret_phone, service, service_with,
    TestService,
};

/// [`CounterStore`] which is always unavailable.
#[derive(Debug)]
struct Unavailable;

#[async_trait]
impl CounterStore for Unavailable {
    async fn hit(
        &self,
        _: &str,
        _: DateTime,
        _: Duration,
        _: u32,
    ) -> Result<Hit, Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }

    async fn peek(
        &self,
        _: &str,
        _: DateTime,
        _: Duration,
        _: u32,
    ) -> Result<Hit, Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }

    async fn lockout(
        &self,
        _: &str,
        _: DateTime,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }

    async fn last_success(
        &self,
        _: &str,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }

    async fn succeed(
        &self,
        _: &str,
        _: DateTime,
        _: Duration,
    ) -> Result<(), Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }

    async fn fail(
        &self,
        _: &str,
        _: DateTime,
        _: Failure,
    ) -> Result<Option<DateTime>, Traced<counters::Error>> {
        Err(tracerr::new!(counters::Error::Unavailable))
    }
}

fn phone_first() -> StartPairing {
    StartPairing {
        entry: entry(Flow::PhoneFirst, None),
        phone: Some(secret_phone()),
        ip: None,
    }
}

#[tokio::test]
async fn sends_pairing_sms() {
    let service = service();

    let out = service.execute(phone_first()).await.unwrap();

    assert_eq!(out.session.status, Status::PendingPairing);
    assert_eq!(out.session.driver_id, None);
    assert!(out.code.is_none());
    let sms = service
        .gateway()
        .outbox()
        .into_iter()
        .filter(|n| n.recipient == Recipient::Phone(secret_phone()))
        .collect::<Vec<_>>();
    assert_eq!(sms.len(), 1);
    assert!(sms[0].message.contains(out.token.as_ref()));
}

#[tokio::test]
async fn qr_pairing_redeems_displayed_code() {
    let service = service();
    let started = service
        .execute(StartPairing {
            entry: entry(Flow::QrPairing, None),
            phone: None,
            ip: None,
        })
        .await
        .unwrap();

    let redeemed = service
        .execute(RedeemPairingToken::Code(started.code.unwrap()))
        .await
        .unwrap();
    assert_eq!(redeemed.claims.session_id, started.session.id);
    assert_eq!(redeemed.claims.identity_hash, None);

    let driver_id = driver::Id::new();
    let session = service
        .execute(ActivateSession {
            claims: redeemed.claims,
            driver_id,
            phone: secret_phone(),
        })
        .await
        .unwrap();
    assert_eq!(session.status, Status::PendingVerification);
    assert_eq!(session.driver_id, Some(driver_id));
}

#[tokio::test]
async fn rejects_unsupported_flows() {
    let service = service();

    let err = service
        .execute(StartPairing {
            entry: entry(Flow::Authenticated, None),
            phone: None,
            ip: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::PairingUnsupported);

    let err = service
        .execute(StartPairing {
            phone: None,
            ..phone_first()
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_ref(),
        start_pairing::ExecutionError::PhoneRequired,
    ));

    let err = service
        .execute(CreateSession {
            entry: entry(Flow::PhoneFirst, Some(driver::Id::new())),
            pre_order: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::PairingRequired);
}

#[tokio::test]
async fn rejects_mismatched_identity() {
    let service = service();
    let started = service.execute(phone_first()).await.unwrap();
    let redeemed = service
        .execute(RedeemPairingToken::Token(started.token))
        .await
        .unwrap();

    let stranger = SecretBox::new(Box::new(Phone::new("+15559990000").unwrap()));
    let err = service
        .execute(ActivateSession {
            claims: redeemed.claims.clone(),
            driver_id: driver::Id::new(),
            phone: stranger,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_ref(),
        activate_session::ExecutionError::IdentityMismatch(_),
    ));
    assert_eq!(err.as_rejection().reason, Reason::IdentityMismatch);

    let owner = driver::Id::new();
    _ = service
        .execute(ActivateSession {
            claims: redeemed.claims.clone(),
            driver_id: owner,
            phone: secret_phone(),
        })
        .await
        .unwrap();
    let err = service
        .execute(ActivateSession {
            claims: redeemed.claims,
            driver_id: driver::Id::new(),
            phone: secret_phone(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::AlreadyPaired);
}

#[tokio::test]
async fn idempotent_retry_reissues_token() {
    let service = service();
    let keyed = || {
        let mut request = phone_first();
        request.entry.idempotency_key = IdempotencyKey::new("pair-1");
        request
    };

    let first = service.execute(keyed()).await.unwrap();
    let again = service.execute(keyed()).await.unwrap();

    assert_eq!(again.session.id, first.session.id);
    assert_eq!(again.session.pairing, first.session.pairing);
}

#[tokio::test]
async fn retry_of_ended_pairing_is_rejected() {
    let mut config = config();
    config.session.qr_pairing_ttl = Duration::from_millis(200);
    let service = service_with(config);
    let keyed = |key: &str| StartPairing {
        entry: Entry {
            idempotency_key: IdempotencyKey::new(key),
            ..entry(Flow::QrPairing, None)
        },
        phone: None,
        ip: None,
    };

    let lapsed = service.execute(keyed("pair-lapsed")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let err = service.execute(keyed("pair-lapsed")).await.unwrap_err();
    assert!(matches!(
        err.as_ref(),
        start_pairing::ExecutionError::SessionExpired(id)
            if *id == lapsed.session.id,
    ));
    assert_eq!(err.as_rejection().reason, Reason::SessionExpired);

    let canceled = service.execute(keyed("pair-canceled")).await.unwrap();
    _ = service
        .execute(CancelSession {
            session_id: canceled.session.id,
            driver_id: None,
        })
        .await
        .unwrap();
    let err = service.execute(keyed("pair-canceled")).await.unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::InvalidState);
}

/// Creates a [`TestService`] whose QR pairing [`Session`]s lapse quickly.
///
/// [`Session`]: service::domain::Session
fn lapsing_qr_service() -> TestService {
    let mut config = config();
    config.session.qr_pairing_ttl = Duration::from_millis(300);
    service_with(config)
}

/// Starts a QR pairing and redeems its displayed code.
async fn redeemed_qr(service: &TestService) -> Claims {
    let started = service
        .execute(StartPairing {
            entry: entry(Flow::QrPairing, None),
            phone: None,
            ip: None,
        })
        .await
        .unwrap();
    service
        .execute(RedeemPairingToken::Code(started.code.unwrap()))
        .await
        .unwrap()
        .claims
}

#[tokio::test]
async fn lapsed_session_is_not_activated() {
    let service = lapsing_qr_service();
    let claims = redeemed_qr(&service).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    let err = service
        .execute(ActivateSession {
            claims,
            driver_id: driver::Id::new(),
            phone: secret_phone(),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        activate_session::ExecutionError::SessionExpired(_),
    ));
    assert_eq!(err.as_rejection().reason, Reason::SessionExpired);
}

#[tokio::test]
async fn lapsed_session_frees_the_slot_for_activation() {
    let service = lapsing_qr_service();
    let driver_id = driver::Id::new();
    let lapsed = service
        .execute(ActivateSession {
            claims: redeemed_qr(&service).await,
            driver_id,
            phone: secret_phone(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let session = service
        .execute(ActivateSession {
            claims: redeemed_qr(&service).await,
            driver_id,
            phone: secret_phone(),
        })
        .await
        .unwrap();
    assert_ne!(session.id, lapsed.id);
    assert_eq!(session.driver_id, Some(driver_id));

    let stored = service
        .execute(query::session::ById::by(lapsed.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, Status::Expired);
}

#[tokio::test]
async fn reactivation_survives_token_expiry() {
    let service = service();
    let mut claims = redeemed_qr(&service).await;
    let driver_id = driver::Id::new();
    let first = service
        .execute(ActivateSession {
            claims: claims.clone(),
            driver_id,
            phone: secret_phone(),
        })
        .await
        .unwrap();

    claims.expires_at = TokenExpirationDateTime::now();
    let again = service
        .execute(ActivateSession {
            claims: claims.clone(),
            driver_id,
            phone: secret_phone(),
        })
        .await
        .unwrap();
    assert_eq!(again.id, first.id);

    let err = service
        .execute(ActivateSession {
            claims,
            driver_id: driver::Id::new(),
            phone: secret_phone(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::AlreadyPaired);
}

async fn limited(service: &TestService) {
    _ = service.execute(phone_first()).await.unwrap();

    let err = service.execute(phone_first()).await.unwrap_err();

    let start_pairing::ExecutionError::RateLimited(denial) = err.as_ref()
    else {
        panic!("expected rate limit denial, got: {err}");
    };
    assert!(denial.retry_after <= Duration::from_secs(30));
    let rejection = err.as_rejection();
    assert_eq!(rejection.kind, Kind::RateLimited);
    assert_eq!(rejection.reason, Reason::Cooldown);
    assert!(rejection.retry_after.is_some());
}

#[tokio::test]
async fn cools_down_after_pairing_start() {
    limited(&service()).await;
}

#[tokio::test]
async fn falls_back_to_local_counters() {
    let (service, _) = Service::new(
        config(),
        Memory::default(),
        Static::new(directory()),
        Some(Arc::new(Unavailable)),
    );

    limited(&service).await;
}
