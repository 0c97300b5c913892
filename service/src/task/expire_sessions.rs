//! [`ExpireSessions`] [`Task`].

use std::{convert::Infallible, error::Error, time};

use common::operations::{By, Perform, Select, Start};
use derive_more::{Display, Error as StdError, From};
use smart_default::SmartDefault;
use tokio::time::interval;
use tracerr::Traced;
use tracing as log;

use crate::{
    command::{touch_session, TouchSession},
    domain::{session, Session},
    infra::{database, Database},
    Command, Service,
};

use super::Task;

/// Configuration for [`ExpireSessions`] [`Task`].
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Interval between sweeps of overdue [`Session`]s.
    #[default(time::Duration::from_secs(60))]
    pub interval: time::Duration,
}

/// [`Task`] for flipping overdue [`Session`]s into
/// [`session::Status::Expired`].
///
/// Every operation checks the expiry on its own, so this [`Task`] only keeps
/// the stored state tidy.
#[derive(Clone, Copy, Debug)]
pub struct ExpireSessions<S> {
    /// [`Config`] of this [`Task`].
    config: Config,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Gw> Task<Start<By<ExpireSessions<Self>, Config>>> for Service<Db, Gw>
where
    ExpireSessions<Service<Db, Gw>>:
        Task<Perform<()>, Ok = (), Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<ExpireSessions<Self>, Config>>,
    ) -> Result<Self::Ok, Self::Err> {
        let config = by.into_inner();
        let task = ExpireSessions {
            config,
            service: self.clone(),
        };

        let mut interval = interval(task.config.interval);
        loop {
            let _ = interval.tick().await;
            _ = task.execute(Perform(())).await.map_err(|e| {
                log::error!("`task::ExpireSessions` failed: {e}");
            });
        }
    }
}

impl<Db, Gw> Task<Perform<()>> for ExpireSessions<Service<Db, Gw>>
where
    Db: Database<
        Select<By<Vec<Session>, session::ExpirationDateTime>>,
        Ok = Vec<Session>,
        Err = Traced<database::Error>,
    >,
    Service<Db, Gw>: Command<
        TouchSession,
        Ok = Session,
        Err = Traced<touch_session::ExecutionError>,
    >,
{
    type Ok = ();
    type Err = Traced<ExecutionError>;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let overdue = self
            .service
            .database()
            .execute(Select(By::new(session::ExpirationDateTime::now())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        let mut expired = 0_usize;
        for s in overdue {
            match self
                .service
                .execute(TouchSession { session_id: s.id })
                .await
            {
                Ok(s) if s.status == session::Status::Expired => expired += 1,
                Ok(_) => {}
                // A single locked `Session` shouldn't stop the sweep.
                Err(e) => {
                    log::warn!("failed to expire `Session(id: {})`: {e}", s.id);
                }
            }
        }
        if expired > 0 {
            log::info!("{expired} overdue `Session`s expired");
        }
        Ok(())
    }
}

/// Error of [`ExpireSessions`] [`Task`] execution.
#[derive(Debug, Display, From, StdError)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::operations::{By, Commit, Insert, Perform, Select, Transact};

    use crate::{
        domain::{
            merchant,
            session::{self, Client, Entry, Flow, Status},
            Session,
        },
        infra::{Database as _, Memory, Static},
        task::Task as _,
        Config, Service,
    };

    use super::ExpireSessions;

    fn session(ttl: Duration) -> Session {
        Session::new(
            Entry {
                idempotency_key: None,
                driver_id: None,
                merchant_id: merchant::Id::new("m_1").unwrap(),
                charger_id: None,
                flow: Flow::QrPairing,
                client: Client::CarBrowser,
                vehicle: None,
            },
            Status::PendingPairing,
            ttl,
        )
    }

    #[tokio::test]
    async fn sweeps_overdue_sessions_only() {
        let (service, _) = Service::new(
            Config::with_secret(b"secret"),
            Memory::default(),
            Static::default(),
            None,
        );
        let overdue = session(Duration::ZERO);
        let live = session(Duration::from_secs(600));
        let tx = service.database().execute(Transact).await.unwrap();
        tx.execute(Insert(overdue.clone())).await.unwrap();
        tx.execute(Insert(live.clone())).await.unwrap();
        tx.execute(Commit).await.unwrap();

        let task = ExpireSessions {
            config: super::Config::default(),
            service: service.clone(),
        };
        task.execute(Perform(())).await.unwrap();

        let status = |id: session::Id| {
            let db = service.database();
            async move {
                let session: Option<Session> = db
                    .execute(Select(By::<Option<Session>, _>::new(id)))
                    .await
                    .unwrap();
                session.unwrap().status
            }
        };
        assert_eq!(status(overdue.id).await, Status::Expired);
        assert_eq!(status(live.id).await, Status::PendingPairing);
    }
}
