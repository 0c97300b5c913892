//! [`PruneRateLimits`] [`Task`].

use std::{convert::Infallible, time};

use common::{
    operations::{By, Perform, Start},
    DateTime,
};
use smart_default::SmartDefault;
use tokio::time::interval;
use tracing as log;

use crate::Service;
#[cfg(doc)]
use crate::rate_limit::RateLimiter;

use super::Task;

/// Configuration for [`PruneRateLimits`] [`Task`].
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Interval between evictions of idle rate limiting entries.
    #[default(time::Duration::from_secs(5 * 60))]
    pub interval: time::Duration,
}

/// [`Task`] for evicting idle entries from the in-process counters of the
/// [`RateLimiter`].
#[derive(Clone, Copy, Debug)]
pub struct PruneRateLimits<S> {
    /// [`Config`] of this [`Task`].
    config: Config,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Gw> Task<Start<By<PruneRateLimits<Self>, Config>>> for Service<Db, Gw>
where
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<PruneRateLimits<Self>, Config>>,
    ) -> Result<Self::Ok, Self::Err> {
        let config = by.into_inner();
        let task = PruneRateLimits {
            config,
            service: self.clone(),
        };

        let mut interval = interval(task.config.interval);
        loop {
            let _ = interval.tick().await;
            _ = task.execute(Perform(())).await;
        }
    }
}

impl<Db, Gw> Task<Perform<()>> for PruneRateLimits<Service<Db, Gw>> {
    type Ok = ();
    type Err = Infallible;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let limits = &self.service.config().rate_limit;
        // Nothing older than the longest window affects any decision.
        let idle = limits.window.max(limits.cooldown).max(limits.lockout);

        let pruned = self
            .service
            .rate_limiter()
            .local()
            .prune(DateTime::now(), idle);
        if pruned > 0 {
            log::debug!("{pruned} idle rate limiting entries pruned");
        }
        Ok(())
    }
}
