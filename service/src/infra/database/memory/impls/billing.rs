//! [`BillingEvent`]-related [`Database`] implementations.

use common::operations::{By, Insert, Select};
use tracerr::Traced;

use crate::{
    domain::{session, BillingEvent},
    infra::{
        database::{
            self,
            memory::{Connection, Memory, Tx},
        },
        Database,
    },
};

impl<C> Database<Select<By<Option<BillingEvent>, session::Id>>> for Memory<C>
where
    C: Connection,
{
    type Ok = Option<BillingEvent>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<BillingEvent>, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session_id = by.into_inner();
        Ok(self.view(|v| v.billing(&session_id).cloned()).await)
    }
}

impl Database<Insert<BillingEvent>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(event): Insert<BillingEvent>,
    ) -> Result<Self::Ok, Self::Err> {
        self.write(|p| p.put_billing(event));
        Ok(())
    }
}

#[cfg(test)]
mod spec {
    use common::{
        operations::{By, Commit, Insert, Select, Transact},
        BasisPoints, Cents, DateTime,
    };

    use crate::{
        domain::{billing::TotalSource, merchant, session, BillingEvent},
        infra::{
            database::{memory::constraint, Memory},
            Database,
        },
    };

    fn event(session_id: session::Id) -> BillingEvent {
        BillingEvent {
            session_id,
            merchant_id: merchant::Id::new("m_1").unwrap(),
            order_total: Cents::new(3_000),
            fee_rate: BasisPoints::new(500).unwrap(),
            billable: Cents::new(150),
            total_source: TotalSource::MerchantReported,
            created_at: DateTime::now().coerce(),
        }
    }

    #[tokio::test]
    async fn one_billing_event_per_session() {
        let db = Memory::default();
        let session_id = session::Id::new();

        let first = db.execute(Transact).await.unwrap();
        let second = db.execute(Transact).await.unwrap();
        first.execute(Insert(event(session_id))).await.unwrap();
        second.execute(Insert(event(session_id))).await.unwrap();

        first.execute(Commit).await.unwrap();
        let err = second.execute(Commit).await.unwrap_err();
        assert!(err
            .as_ref()
            .is_unique_violation(Some(constraint::BILLING_EVENT)));

        let stored = db
            .execute(Select(By::<Option<BillingEvent>, _>::new(session_id)))
            .await
            .unwrap();
        assert_eq!(stored.map(|e| e.billable), Some(Cents::new(150)));
    }
}
