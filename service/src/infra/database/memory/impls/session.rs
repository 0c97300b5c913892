//! [`Session`]-related [`Database`] implementations.

use common::operations::{By, Insert, Lock, Select, Update};
use tracerr::Traced;

use crate::{
    domain::{
        driver,
        session::{self, ArrivalCode, Flow, IdempotencyKey, PairingCode},
        Session,
    },
    infra::{
        database::{
            self,
            memory::{Connection, LockKey, Memory, Tx},
        },
        Database,
    },
    read::session::Active,
};

impl<C> Database<Select<By<Option<Session>, session::Id>>> for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Session>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Session>, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();
        Ok(self.view(|v| v.session(&id).cloned()).await)
    }
}

impl<'k, C> Database<Select<By<Option<Session>, &'k IdempotencyKey>>>
    for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Session>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Session>, &'k IdempotencyKey>>,
    ) -> Result<Self::Ok, Self::Err> {
        let key = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions()
                    .find(|s| s.idempotency_key.as_ref() == Some(key))
                    .cloned()
            })
            .await)
    }
}

impl<'c, C> Database<Select<By<Option<Session>, &'c ArrivalCode>>>
    for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Session>;
    type Err = Traced<database::Error>;

    /// Active [`Session`] is preferred, as the [`ArrivalCode`]s are unique
    /// among them only.
    async fn execute(
        &self,
        Select(by): Select<By<Option<Session>, &'c ArrivalCode>>,
    ) -> Result<Self::Ok, Self::Err> {
        let code = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions()
                    .filter(|s| s.arrival_code.as_ref() == Some(code))
                    .max_by_key(|s| (s.is_active(), s.created_at))
                    .cloned()
            })
            .await)
    }
}

impl<'c, C> Database<Select<By<Option<Session>, &'c PairingCode>>>
    for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Session>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Session>, &'c PairingCode>>,
    ) -> Result<Self::Ok, Self::Err> {
        let code = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions()
                    .filter(|s| s.is_active())
                    .filter(|s| {
                        s.pairing.as_ref().and_then(|p| p.code.as_ref())
                            == Some(code)
                    })
                    .max_by_key(|s| s.created_at)
                    .cloned()
            })
            .await)
    }
}

impl<C> Database<Select<By<Option<Active<Session>>, (driver::Id, Flow)>>>
    for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Active<Session>>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Active<Session>>, (driver::Id, Flow)>>,
    ) -> Result<Self::Ok, Self::Err> {
        let (driver_id, flow) = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions()
                    .filter(|s| s.is_active())
                    .filter(|s| s.driver_id == Some(driver_id) && s.flow == flow)
                    .max_by_key(|s| s.created_at)
                    .cloned()
                    .map(Active)
            })
            .await)
    }
}

impl<C> Database<Select<By<Option<Active<Session>>, driver::Id>>> for Memory<C>
where
    C: Connection,
{
    type Ok = Option<Active<Session>>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Active<Session>>, driver::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let driver_id = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions()
                    .filter(|s| s.is_active())
                    .filter(|s| s.driver_id == Some(driver_id))
                    .max_by_key(|s| s.created_at)
                    .cloned()
                    .map(Active)
            })
            .await)
    }
}

impl<C> Database<Select<By<Vec<Session>, session::ExpirationDateTime>>>
    for Memory<C>
where
    C: Connection,
{
    type Ok = Vec<Session>;
    type Err = Traced<database::Error>;

    /// Selects the active [`Session`]s expired by the provided moment.
    async fn execute(
        &self,
        Select(by): Select<By<Vec<Session>, session::ExpirationDateTime>>,
    ) -> Result<Self::Ok, Self::Err> {
        let at = by.into_inner();
        Ok(self
            .view(|v| {
                v.sessions().filter(|s| s.is_expired(at)).cloned().collect()
            })
            .await)
    }
}

impl Database<Insert<Session>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(session): Insert<Session>,
    ) -> Result<Self::Ok, Self::Err> {
        self.write(|p| p.put_session(session, true));
        Ok(())
    }
}

impl Database<Update<Session>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(session): Update<Session>,
    ) -> Result<Self::Ok, Self::Err> {
        self.write(|p| p.put_session(session, false));
        Ok(())
    }
}

impl Database<Lock<By<Session, session::Id>>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Session, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        self.lock(LockKey::Session(by.into_inner()))
            .await
            .map_err(tracerr::wrap!())
    }
}

impl Database<Lock<By<Session, (driver::Id, Flow)>>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Session, (driver::Id, Flow)>>,
    ) -> Result<Self::Ok, Self::Err> {
        let (driver_id, flow) = by.into_inner();
        self.lock(LockKey::Slot(driver_id, flow))
            .await
            .map_err(tracerr::wrap!())
    }
}

impl<'k> Database<Lock<By<Session, &'k IdempotencyKey>>> for Memory<Tx> {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Lock(by): Lock<By<Session, &'k IdempotencyKey>>,
    ) -> Result<Self::Ok, Self::Err> {
        self.lock(LockKey::IdempotencyKey(by.into_inner().clone()))
            .await
            .map_err(tracerr::wrap!())
    }
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::operations::{By, Commit, Insert, Lock, Select, Transact, Update};

    use crate::{
        domain::{
            driver, merchant,
            session::{self, Client, Entry, Flow, IdempotencyKey, Status},
            Session,
        },
        infra::{
            database::{
                memory::{self, constraint},
                Memory,
            },
            Database,
        },
    };

    fn session(driver_id: Option<driver::Id>) -> Session {
        Session::new(
            Entry {
                idempotency_key: None,
                driver_id,
                merchant_id: merchant::Id::new("m_1").unwrap(),
                charger_id: None,
                flow: Flow::Authenticated,
                client: Client::App,
                vehicle: None,
            },
            Status::PendingVerification,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let db = Memory::default();
        let s = session(None);

        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Insert(s.clone())).await.unwrap();

        let inside = tx
            .execute(Select(By::<Option<Session>, _>::new(s.id)))
            .await
            .unwrap();
        assert_eq!(inside.as_ref(), Some(&s));
        let outside = db
            .execute(Select(By::<Option<Session>, _>::new(s.id)))
            .await
            .unwrap();
        assert_eq!(outside, None);

        drop(tx);
        let rolled_back = db
            .execute(Select(By::<Option<Session>, _>::new(s.id)))
            .await
            .unwrap();
        assert_eq!(rolled_back, None);
    }

    #[tokio::test]
    async fn enforces_single_active_slot() {
        let db = Memory::default();
        let driver_id = driver::Id::new();

        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Insert(session(Some(driver_id)))).await.unwrap();
        tx.execute(Commit).await.unwrap();

        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Insert(session(Some(driver_id)))).await.unwrap();
        let err = tx.execute(Commit).await.unwrap_err();

        assert!(err.as_ref().is_unique_violation(Some(constraint::ACTIVE_SLOT)));
    }

    #[tokio::test]
    async fn terminal_session_frees_slot() {
        let db = Memory::default();
        let driver_id = driver::Id::new();
        let mut first = session(Some(driver_id));

        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Insert(first.clone())).await.unwrap();
        tx.execute(Commit).await.unwrap();

        first.expire().unwrap();
        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Update(first)).await.unwrap();
        tx.execute(Insert(session(Some(driver_id)))).await.unwrap();
        tx.execute(Commit).await.unwrap();
    }

    #[tokio::test]
    async fn enforces_unique_idempotency_key() {
        let db = Memory::default();
        let key = IdempotencyKey::new("req-1").unwrap();

        for expected_ok in [true, false] {
            let mut s = session(None);
            s.idempotency_key = Some(key.clone());

            let tx = db.execute(Transact).await.unwrap();
            tx.execute(Insert(s)).await.unwrap();
            let res = tx.execute(Commit).await;

            assert_eq!(res.is_ok(), expected_ok);
        }

        let found = db
            .execute(Select(By::<Option<Session>, _>::new(&key)))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn relocking_within_tx_is_noop() {
        let db = Memory::default();
        let id = session::Id::new();

        let tx = db.execute(Transact).await.unwrap();
        tx.execute(Lock(By::<Session, _>::new(id))).await.unwrap();
        tx.execute(Lock(By::<Session, _>::new(id))).await.unwrap();
    }

    #[tokio::test]
    async fn lock_times_out_under_contention() {
        let db = Memory::new(memory::Config {
            lock_timeout: Duration::from_millis(20),
        });
        let id = session::Id::new();

        let holder = db.execute(Transact).await.unwrap();
        holder.execute(Lock(By::<Session, _>::new(id))).await.unwrap();

        let waiter = db.execute(Transact).await.unwrap();
        let err = waiter
            .execute(Lock(By::<Session, _>::new(id)))
            .await
            .unwrap_err();
        assert!(err.as_ref().is_contention());

        drop(holder);
        waiter.execute(Lock(By::<Session, _>::new(id))).await.unwrap();
    }
}
