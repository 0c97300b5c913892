//! Merchant confirmation and billing.

mod support;

use common::Cents;
use futures::future::join_all;
use rstest::rstest;
use service::{
    command::{
        confirm_merchant::{self, SessionRef},
        ConfirmMerchant, GenerateCode, RedeemCode,
    },
    domain::{
        billing::TotalSource,
        order,
        session::{ArrivalCode, BillingStatus, Flow, Status},
        Session,
    },
    query,
    rejection::Reason,
    AsRejection as _, Command as _,
};

use self::support::{
    paired_phone_first, service, verify_at_charger, with_code, TestService,
    POS_ORDER, POS_TOTAL,
};

/// Drives a new [`Session`] up to a redeemed [`ArrivalCode`].
async fn redeemed(
    service: &TestService,
    order_number: Option<&str>,
    total: Option<Cents>,
) -> (Session, ArrivalCode) {
    let (_, code) = with_code(service).await;
    let out = service
        .execute(RedeemCode {
            code: code.clone(),
            order_number: order_number.and_then(order::Number::new),
            total,
        })
        .await
        .unwrap();
    (out.session, code)
}

fn confirm(session: &Session, total: Option<u64>) -> ConfirmMerchant {
    ConfirmMerchant {
        session: SessionRef::Id(session.id),
        merchant_reported_total: total.map(Cents::new),
    }
}

#[rstest]
#[case::below_minimum(50, 50)]
#[case::within_band(3_000, 150)]
#[case::above_maximum(20_000, 500)]
#[tokio::test]
async fn fee_is_clamped(#[case] total: u64, #[case] billable: u64) {
    let service = service();
    let (session, _) = redeemed(&service, None, None).await;

    let out = service.execute(confirm(&session, Some(total))).await.unwrap();

    let event = out.billing.unwrap();
    assert_eq!(event.order_total, Cents::new(total));
    assert_eq!(event.billable, Cents::new(billable));
    assert_eq!(event.total_source, TotalSource::MerchantReported);
    assert_eq!(out.session.billable, Some(Cents::new(billable)));
}

#[tokio::test]
async fn bills_exactly_once() {
    let service = service();
    let (session, _) = redeemed(&service, None, None).await;

    let results = join_all(
        (0..8).map(|_| service.execute(confirm(&session, Some(3_000)))),
    )
    .await;

    let outputs = results.into_iter().map(Result::unwrap).collect::<Vec<_>>();
    assert_eq!(outputs.iter().filter(|o| !o.already_confirmed).count(), 1);
    let events = outputs
        .into_iter()
        .map(|o| o.billing.unwrap())
        .collect::<Vec<_>>();
    assert!(events.iter().all(|e| *e == events[0]));

    let stored = service
        .execute(query::billing::BySession::by(session.id))
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), Some(&events[0]));
}

#[tokio::test]
async fn pos_total_takes_precedence() {
    let service = service();
    let (_, code) =
        redeemed(&service, Some(POS_ORDER), Some(Cents::new(1_000))).await;

    let out = service
        .execute(ConfirmMerchant {
            session: SessionRef::Code(code),
            merchant_reported_total: Some(Cents::new(9_000)),
        })
        .await
        .unwrap();

    let event = out.billing.unwrap();
    assert_eq!(event.order_total, POS_TOTAL);
    assert_eq!(event.total_source, TotalSource::Pos);
    assert_eq!(out.session.status, Status::Completed);
}

#[tokio::test]
async fn falls_back_to_driver_total() {
    let service = service();
    let (session, _) =
        redeemed(&service, None, Some(Cents::new(2_000))).await;

    let out = service.execute(confirm(&session, None)).await.unwrap();

    let event = out.billing.unwrap();
    assert_eq!(event.order_total, Cents::new(2_000));
    assert_eq!(event.total_source, TotalSource::DriverReported);
    assert_eq!(event.billable, Cents::new(100));
}

#[tokio::test]
async fn completes_unbillable_without_totals() {
    let service = service();
    let (session, _) = redeemed(&service, None, None).await;

    let out = service.execute(confirm(&session, None)).await.unwrap();

    assert!(out.billing.is_none());
    assert_eq!(out.session.status, Status::CompletedUnbillable);
    assert_eq!(out.session.billing_status, BillingStatus::Unbillable);
    assert!(out.session.merchant_confirmed_at.is_some());

    let again = service
        .execute(confirm(&session, Some(3_000)))
        .await
        .unwrap();
    assert!(again.already_confirmed);
    assert!(again.billing.is_none());
    let stored = service
        .execute(query::billing::BySession::by(session.id))
        .await
        .unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn refuses_unredeemed_session() {
    let service = service();
    let (session, _) = with_code(&service).await;

    let err = service
        .execute(confirm(&session, Some(3_000)))
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        confirm_merchant::ExecutionError::WrongStatus(Status::CodeGenerated),
    ));
    assert_eq!(err.as_rejection().reason, Reason::InvalidState);
}

#[tokio::test]
async fn phone_first_arrival_end_to_end() {
    let service = service();

    let session = paired_phone_first(&service).await;
    assert_eq!(session.flow, Flow::PhoneFirst);
    assert_eq!(session.status, Status::PendingVerification);

    let verified = verify_at_charger(&service, &session).await;
    assert_eq!(verified.session.status, Status::Verified);

    let issued = service
        .execute(GenerateCode {
            session_id: session.id,
        })
        .await
        .unwrap();
    let code = issued.code.to_string();
    assert!(code.starts_with("NVR-"));
    assert_eq!(code.len(), ArrivalCode::PREFIX.len() + ArrivalCode::LEN);

    let redeemed = service
        .execute(RedeemCode {
            code: issued.code,
            order_number: order::Number::new("A1"),
            total: Some(Cents::new(2_500)),
        })
        .await
        .unwrap();
    assert_eq!(redeemed.session.status, Status::CodeRedeemed);

    let out = service.execute(confirm(&session, Some(3_000))).await.unwrap();

    let event = out.billing.unwrap();
    assert_eq!(event.total_source, TotalSource::MerchantReported);
    assert_eq!(event.order_total, Cents::new(3_000));
    assert_eq!(event.billable, Cents::new(150));
    assert_eq!(out.session.status, Status::Completed);
    assert_eq!(out.session.billing_status, BillingStatus::Billed);
    assert_eq!(out.session.billable, Some(Cents::new(150)));
}
