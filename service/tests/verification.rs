//! Arrival verification at a charger.

mod support;

use service::{
    command::{verify_arrival, CreateSession, VerifyArrival},
    domain::{
        charger::QrPayload,
        driver,
        geo::Coordinates,
        session::{Entry, Flow, Method, Status},
        Session,
    },
    query,
    rejection::{Kind, Reason},
    AsRejection as _, Command as _,
};

use self::support::{
    authenticated, charger_id, charger_location, config, entry, service,
    service_with, verify_at_charger, TestService,
};

/// Location roughly 220 meters north of the charger.
fn nearby() -> Coordinates {
    Coordinates::new(37.778_5, -122.423_4).unwrap()
}

fn at(session: &Session, location: Coordinates) -> VerifyArrival {
    VerifyArrival {
        session_id: session.id,
        method: Method::PhoneGeofence,
        location: Some(location),
        qr_payload: None,
    }
}

fn scanned(session: &Session, raw: &str) -> VerifyArrival {
    VerifyArrival {
        session_id: session.id,
        method: Method::QrScan,
        location: None,
        qr_payload: QrPayload::new(raw),
    }
}

async fn unbound(service: &TestService) -> Session {
    service
        .execute(CreateSession {
            entry: Entry {
                charger_id: None,
                ..entry(Flow::Authenticated, Some(driver::Id::new()))
            },
            pre_order: false,
        })
        .await
        .unwrap()
}

fn with_charger_radius(meters: f64) -> TestService {
    let mut config = config();
    config.geofence.charger_radius_m = meters;
    service_with(config)
}

#[tokio::test]
async fn verifies_within_charger_radius() {
    let service = service();
    let session = authenticated(&service).await;

    let out = verify_at_charger(&service, &session).await;

    assert!(!out.already_verified);
    assert_eq!(out.session.status, Status::Verified);
    assert_eq!(out.distance.map(|d| d.meters()), Some(0.0));
    let verification = out.session.verification.unwrap();
    assert_eq!(verification.method, Method::DeviceGeofence);
    assert_eq!(verification.location, Some(charger_location()));
}

#[tokio::test]
async fn boundary_is_inclusive() {
    let d = charger_location().distance_to(&nearby()).meters();

    let service = with_charger_radius(d);
    let session = authenticated(&service).await;
    let out = service.execute(at(&session, nearby())).await.unwrap();
    assert_eq!(out.session.status, Status::Verified);

    let service = with_charger_radius(d - 0.01);
    let session = authenticated(&service).await;
    let err = service.execute(at(&session, nearby())).await.unwrap_err();
    assert!(matches!(
        err.as_ref(),
        verify_arrival::ExecutionError::TooFar(_),
    ));
    let rejection = err.as_rejection();
    assert_eq!(rejection.kind, Kind::TooFar);
    let distance = rejection.distance.unwrap().meters();
    assert!((distance - d).abs() < 1e-9, "{distance} != {d}");
}

#[tokio::test]
async fn rejected_attempt_is_counted() {
    let service = with_charger_radius(50.0);
    let session = authenticated(&service).await;

    _ = service.execute(at(&session, nearby())).await.unwrap_err();

    let stored = service
        .execute(query::session::ById::by(session.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.verification_attempts, 1);
    assert_eq!(stored.status, Status::PendingVerification);
}

#[tokio::test]
async fn runs_out_of_attempts() {
    let mut config = config();
    config.geofence.charger_radius_m = 50.0;
    config.session.max_verification_attempts = 2;
    let service = service_with(config);
    let session = authenticated(&service).await;

    for _ in 0..2 {
        let err = service.execute(at(&session, nearby())).await.unwrap_err();
        assert!(matches!(
            err.as_ref(),
            verify_arrival::ExecutionError::TooFar(_),
        ));
    }
    let err = service
        .execute(at(&session, charger_location()))
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        verify_arrival::ExecutionError::TooManyAttempts(_),
    ));
    let rejection = err.as_rejection();
    assert_eq!(rejection.reason, Reason::TooManyAttempts);
    assert_eq!(rejection.kind, Kind::RateLimited);
    assert_eq!(rejection.retry_after, None);
}

#[tokio::test]
async fn reverification_is_idempotent() {
    let service = service();
    let session = authenticated(&service).await;
    let first = verify_at_charger(&service, &session).await;

    let again = service
        .execute(at(&session, nearby()))
        .await
        .unwrap();

    assert!(again.already_verified);
    assert_eq!(again.session.status, Status::Verified);
    assert_eq!(
        again.session.verification.map(|v| v.verified_at),
        first.session.verification.map(|v| v.verified_at),
    );
}

#[tokio::test]
async fn geofence_requires_location_and_charger() {
    let service = service();

    let session = authenticated(&service).await;
    let err = service
        .execute(VerifyArrival {
            location: None,
            ..at(&session, charger_location())
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::LocationRequired);

    let session = unbound(&service).await;
    let err = service
        .execute(at(&session, charger_location()))
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::ChargerNotBound);
}

#[tokio::test]
async fn qr_scan_binds_charger() {
    let service = service();
    let session = unbound(&service).await;

    let out = service
        .execute(scanned(
            &session,
            &format!("https://arrive.test/charger/{}", charger_id()),
        ))
        .await
        .unwrap();

    assert_eq!(out.session.status, Status::Verified);
    assert_eq!(out.session.charger_id, Some(charger_id()));
    assert_eq!(out.distance, None);
}

#[tokio::test]
async fn qr_scan_rejects_other_charger() {
    let service = service();
    let session = authenticated(&service).await;

    let err = service
        .execute(scanned(&session, "charger:ch_mission_02"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        verify_arrival::ExecutionError::ChargerMismatch(_),
    ));
    assert_eq!(err.as_rejection().kind, Kind::Conflict);
}

#[tokio::test]
async fn qr_scan_rejects_unknown_charger() {
    let service = service();
    let session = unbound(&service).await;

    let err = service
        .execute(scanned(&session, "charger:ch_mission_02"))
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::ChargerNotFound);

    let err = service
        .execute(VerifyArrival {
            qr_payload: None,
            ..scanned(&session, "unused")
        })
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::QrRequired);

    let err = service
        .execute(scanned(&session, "https://arrive.test/menu"))
        .await
        .unwrap_err();
    assert_eq!(err.as_rejection().reason, Reason::InvalidQr);
}
