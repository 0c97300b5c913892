//! Orders queued ahead of the arrival and released by proximity.

mod support;

use service::{
    command::{
        trigger_order, BindOrder, CancelSession, CreateSession, ReleaseOrder,
        TriggerOrder,
    },
    domain::{
        driver,
        geo::Coordinates,
        notification::Recipient,
        order::{self, Destination, QueuedOrder},
        session::{Flow, Status},
        Session,
    },
    rejection::Reason,
    AsRejection as _, Command as _,
};

use self::support::{
    entry, merchant_id, merchant_location, service, TestService,
};

/// Location well beyond the merchant's radius.
fn far_away() -> Coordinates {
    Coordinates::new(37.790_0, -122.423_4).unwrap()
}

fn bind(session: &Session) -> BindOrder {
    BindOrder {
        session_id: session.id,
        destination: Destination::new("https://merchant.test/orders/42")
            .unwrap(),
        number: order::Number::new("42"),
        payload: Some(r#"{"items":["latte"]}"#.into()),
        estimated_total: None,
    }
}

async fn pre_ordered(service: &TestService) -> (Session, QueuedOrder) {
    let session = service
        .execute(CreateSession {
            entry: entry(Flow::Authenticated, Some(driver::Id::new())),
            pre_order: true,
        })
        .await
        .unwrap();
    let order = service.execute(bind(&session)).await.unwrap();
    (session, order)
}

fn merchant_notifications(service: &TestService) -> usize {
    service
        .gateway()
        .outbox()
        .into_iter()
        .filter(|n| n.recipient == Recipient::Merchant(merchant_id()))
        .count()
}

#[tokio::test]
async fn binding_is_idempotent() {
    let service = service();
    let (session, order) = pre_ordered(&service).await;

    let again = service.execute(bind(&session)).await.unwrap();

    assert_eq!(again.id, order.id);
    assert_eq!(order.status, order::Status::Queued);
    assert_eq!(order.merchant_id, merchant_id());
}

#[tokio::test]
async fn stays_queued_outside_merchant_radius() {
    let service = service();
    let (session, _) = pre_ordered(&service).await;

    let out = service
        .execute(TriggerOrder {
            session_id: session.id,
            location: far_away(),
        })
        .await
        .unwrap();

    assert!(out.artifact.is_none());
    assert!(out.eta.is_none());
    assert!(out.distance.meters() > 500.0);
    assert_eq!(merchant_notifications(&service), 0);
}

#[tokio::test]
async fn releases_within_merchant_radius() {
    let service = service();
    let (session, order) = pre_ordered(&service).await;

    let out = service
        .execute(TriggerOrder {
            session_id: session.id,
            location: merchant_location(),
        })
        .await
        .unwrap();

    let artifact = out.artifact.unwrap();
    assert_eq!(artifact.order_id, order.id);
    assert_eq!(artifact.session_id, session.id);
    assert!(artifact
        .url
        .query_pairs()
        .any(|(k, v)| k == QueuedOrder::TRACKING_PARAM
            && v == session.id.to_string()));
    let eta = out.eta.unwrap();
    assert_eq!(eta.wait, eta.preparation.saturating_sub(eta.walking));
    assert_eq!(merchant_notifications(&service), 1);
}

#[tokio::test]
async fn rerelease_returns_same_artifact() {
    let service = service();
    let (session, _) = pre_ordered(&service).await;

    let first = service
        .execute(ReleaseOrder {
            session_id: session.id,
        })
        .await
        .unwrap()
        .unwrap();
    let again = service
        .execute(TriggerOrder {
            session_id: session.id,
            location: merchant_location(),
        })
        .await
        .unwrap();

    assert_eq!(again.artifact, Some(first));
    assert_eq!(merchant_notifications(&service), 1);
}

#[tokio::test]
async fn nothing_to_release_without_order() {
    let service = service();
    let session = service
        .execute(CreateSession {
            entry: entry(Flow::Authenticated, Some(driver::Id::new())),
            pre_order: false,
        })
        .await
        .unwrap();

    let artifact = service
        .execute(ReleaseOrder {
            session_id: session.id,
        })
        .await
        .unwrap();

    assert!(artifact.is_none());
}

#[tokio::test]
async fn refuses_trigger_after_cancel() {
    let service = service();
    let (session, _) = pre_ordered(&service).await;
    let canceled = service
        .execute(CancelSession {
            session_id: session.id,
            driver_id: session.driver_id,
        })
        .await
        .unwrap();
    assert_eq!(canceled.session.status, Status::Canceled);

    let err = service
        .execute(TriggerOrder {
            session_id: session.id,
            location: merchant_location(),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        trigger_order::ExecutionError::WrongStatus(Status::Canceled),
    ));
    assert_eq!(err.as_rejection().reason, Reason::InvalidState);
    assert_eq!(merchant_notifications(&service), 0);
}
