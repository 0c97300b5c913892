//! Arrival code issuance and redemption at the merchant's counter.

mod support;

use common::Cents;
use futures::future::join_all;
use service::{
    command::{generate_code, redeem_code, GenerateCode, RedeemCode},
    domain::{
        order,
        session::{ArrivalCode, OrderSource, Status},
    },
    query,
    rejection::Reason,
    AsRejection as _, Command as _,
};

use self::support::{
    authenticated, service, with_code, POS_ORDER, POS_TOTAL,
};

fn redeem(code: &ArrivalCode) -> RedeemCode {
    RedeemCode {
        code: code.clone(),
        order_number: None,
        total: None,
    }
}

#[tokio::test]
async fn issues_code_once_while_live() {
    let service = service();
    let (session, code) = with_code(&service).await;

    assert!(code.to_string().starts_with(ArrivalCode::PREFIX));
    assert_eq!(session.status, Status::CodeGenerated);

    let again = service
        .execute(GenerateCode {
            session_id: session.id,
        })
        .await
        .unwrap();
    assert_eq!(again.code, code);
    assert_eq!(Some(again.expires_at), session.code_expires_at);

    let holder = service
        .execute(query::session::ByArrivalCode::by(&code))
        .await
        .unwrap()
        .map(|s| s.id);
    assert_eq!(holder, Some(session.id));
}

#[tokio::test]
async fn refuses_code_before_verification() {
    let service = service();
    let session = authenticated(&service).await;

    let err = service
        .execute(GenerateCode {
            session_id: session.id,
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        generate_code::ExecutionError::WrongStatus(Status::PendingVerification),
    ));
    assert_eq!(err.as_rejection().reason, Reason::InvalidState);
}

#[tokio::test]
async fn redeems_exactly_once() {
    let service = service();
    let (session, code) = with_code(&service).await;

    let results = join_all((0..8).map(|_| service.execute(redeem(&code)))).await;

    let outputs = results.into_iter().map(Result::unwrap).collect::<Vec<_>>();
    let fresh = outputs.iter().filter(|o| !o.already_redeemed).count();
    assert_eq!(fresh, 1);
    for out in &outputs {
        assert_eq!(out.session.id, session.id);
        assert_eq!(out.session.status, Status::CodeRedeemed);
    }
    let redeemed_at = outputs
        .iter()
        .map(|o| o.session.redeemed_at)
        .collect::<Vec<_>>();
    assert!(redeemed_at.iter().all(|at| at.is_some() && *at == redeemed_at[0]));
}

#[tokio::test]
async fn merges_point_of_sale_total() {
    let service = service();
    let (_, code) = with_code(&service).await;

    let out = service
        .execute(RedeemCode {
            code,
            order_number: order::Number::new(POS_ORDER),
            total: Some(Cents::new(3_900)),
        })
        .await
        .unwrap();

    let binding = out.session.order.unwrap();
    assert_eq!(binding.source, OrderSource::Counter);
    assert_eq!(binding.number, order::Number::new(POS_ORDER));
    assert_eq!(binding.pos_total, Some(POS_TOTAL));
    assert_eq!(binding.estimated_total, Some(Cents::new(3_900)));
}

#[tokio::test]
async fn unknown_order_number_leaves_no_pos_total() {
    let service = service();
    let (_, code) = with_code(&service).await;

    let out = service
        .execute(RedeemCode {
            code,
            order_number: order::Number::new("P-404"),
            total: None,
        })
        .await
        .unwrap();

    let binding = out.session.order.unwrap();
    assert_eq!(binding.number, order::Number::new("P-404"));
    assert_eq!(binding.pos_total, None);
}

#[tokio::test]
async fn rejects_unknown_code() {
    let service = service();

    let err = service
        .execute(redeem(&ArrivalCode::new("NVR-ZZZZ").unwrap()))
        .await
        .unwrap_err();

    assert!(matches!(
        err.as_ref(),
        redeem_code::ExecutionError::CodeNotExists(_),
    ));
    assert_eq!(err.as_rejection().reason, Reason::CodeNotFound);
}
