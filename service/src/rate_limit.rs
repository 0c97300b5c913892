//! Identity-level [`RateLimiter`].

use std::{fmt, net::IpAddr, slice, sync::Arc, time::Duration};

use common::{define_kind, DateTime};
use smart_default::SmartDefault;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::driver::IdentityHash,
    infra::{
        counters::{self, Failure, Local},
        CounterStore,
    },
};

/// Runs the provided operation against the shared [`CounterStore`] of the
/// [`RateLimiter`], falling back to its [`Local`] one if the shared store is
/// absent or fails.
macro_rules! with_fallback {
    ($limiter:ident, |$store:ident| $op:expr) => {{
        let mut shared = None;
        if let Some($store) = $limiter.shared.as_deref() {
            match $op.await {
                Ok(v) => shared = Some(v),
                Err(e) => log::warn!(
                    "shared counter store failed, using the local one: {e}",
                ),
            }
        }
        match shared {
            Some(v) => Ok(v),
            None => {
                let $store: &dyn CounterStore = &*$limiter.local;
                $op.await
            }
        }
    }};
}

/// [`RateLimiter`] configuration.
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Maximum number of requests per [`window`].
    ///
    /// [`window`]: Config::window
    #[default(5)]
    pub max_requests: u32,

    /// Sliding window bounding the request rate.
    #[default(Duration::from_secs(60))]
    pub window: Duration,

    /// Time after a success during which further requests are denied.
    #[default(Duration::from_secs(30))]
    pub cooldown: Duration,

    /// Number of consecutive failures installing a lockout.
    #[default(5)]
    pub failure_threshold: u32,

    /// Duration of a lockout.
    #[default(Duration::from_secs(15 * 60))]
    pub lockout: Duration,
}

/// Identity requests are limited by.
///
/// Raw phone numbers are never used, only their [`IdentityHash`]es.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Identity {
    /// Phone identified by its [`IdentityHash`].
    Phone(IdentityHash),

    /// Client IP address.
    Ip(IpAddr),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phone(hash) => write!(f, "phone:{hash}"),
            Self::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

define_kind! {
    #[doc = "Independent group of limited requests."]
    enum Bucket {
        #[doc = "Starting a pairing."]
        PairingStart = 1,

        #[doc = "Activating a paired session."]
        PairingActivate = 2,
    }
}

impl Bucket {
    /// Indicates whether a success in this [`Bucket`] starts a cooldown.
    #[must_use]
    pub const fn has_cooldown(self) -> bool {
        matches!(self, Self::PairingStart)
    }
}

/// Decision of a [`RateLimiter::check()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Request is allowed.
    Allowed,

    /// Request is denied.
    Denied(Denial),
}

/// Denial of a request by a [`RateLimiter`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Denial {
    /// [`DenialReason`] of this [`Denial`].
    pub reason: DenialReason,

    /// Time after which the request may be retried.
    pub retry_after: Duration,
}

define_kind! {
    #[doc = "Reason of a [`Denial`]."]
    enum DenialReason {
        #[doc = "Identity is locked out after consecutive failures."]
        LockedOut = 1,

        #[doc = "Identity has succeeded too recently."]
        Cooldown = 2,

        #[doc = "Identity has made too many requests in the window."]
        RateExceeded = 3,
    }
}

/// Sliding-window per-identity rate limiter with lockout.
///
/// Uses a shared [`CounterStore`] when one is available, degrading to the
/// in-process [`Local`] one with the same semantics whenever the shared store
/// fails.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// [`Config`] of this [`RateLimiter`].
    config: Config,

    /// Shared [`CounterStore`], if any.
    shared: Option<Arc<dyn CounterStore>>,

    /// In-process fallback [`CounterStore`].
    local: Arc<Local>,
}

impl RateLimiter {
    /// Creates a new [`RateLimiter`] with the provided [`Config`] and shared
    /// [`CounterStore`].
    #[must_use]
    pub fn new(config: Config, shared: Option<Arc<dyn CounterStore>>) -> Self {
        Self {
            config,
            shared,
            local: Arc::default(),
        }
    }

    /// Returns the in-process fallback [`CounterStore`].
    #[must_use]
    pub fn local(&self) -> &Local {
        &self.local
    }

    /// Returns the counters key of the provided [`Identity`] in the provided
    /// [`Bucket`].
    fn key(identity: &Identity, bucket: Bucket) -> String {
        format!("rate_limit:{bucket}:{identity}")
    }

    /// Checks whether a request of the provided [`Identity`] in the provided
    /// [`Bucket`] is allowed, registering it if so.
    ///
    /// Lockout pre-empts the cooldown, which pre-empts the rate window.
    ///
    /// # Errors
    ///
    /// If both the shared and the local [`CounterStore`]s fail.
    pub async fn check(
        &self,
        identity: &Identity,
        bucket: Bucket,
    ) -> Result<Decision, Traced<counters::Error>> {
        self.check_all(slice::from_ref(identity), bucket).await
    }

    /// Checks whether a request made on behalf of all the provided
    /// [`Identity`]s in the provided [`Bucket`] is allowed.
    ///
    /// The request is registered for every [`Identity`] only once none of
    /// them denies it.
    ///
    /// # Errors
    ///
    /// If both the shared and the local [`CounterStore`]s fail.
    pub async fn check_all(
        &self,
        identities: &[Identity],
        bucket: Bucket,
    ) -> Result<Decision, Traced<counters::Error>> {
        let now = DateTime::now();
        let Config {
            max_requests,
            window,
            ..
        } = self.config;

        for identity in identities {
            if let Some(denial) = self
                .inspect(identity, bucket, now)
                .await
                .map_err(tracerr::wrap!())?
            {
                return Ok(Decision::Denied(denial));
            }
        }

        for identity in identities {
            let key = Self::key(identity, bucket);
            let hit: counters::Hit = with_fallback!(self, |store| {
                store.hit(&key, now, window, max_requests)
            })?;
            if !hit.allowed {
                log::debug!("`{identity}` exceeded the `{bucket}` rate");
                return Ok(Decision::Denied(self.exceeded(hit, now)));
            }
        }
        Ok(Decision::Allowed)
    }

    /// Inspects the counters of the provided [`Identity`] in the provided
    /// [`Bucket`] without registering anything.
    async fn inspect(
        &self,
        identity: &Identity,
        bucket: Bucket,
        now: DateTime,
    ) -> Result<Option<Denial>, Traced<counters::Error>> {
        let key = Self::key(identity, bucket);
        let Config {
            max_requests,
            window,
            cooldown,
            ..
        } = self.config;

        let locked_until: Option<DateTime> =
            with_fallback!(self, |store| store.lockout(&key, now))?;
        if let Some(until) = locked_until {
            return Ok(Some(Denial {
                reason: DenialReason::LockedOut,
                retry_after: until.remaining_since(now),
            }));
        }

        if bucket.has_cooldown() {
            let last_success: Option<DateTime> =
                with_fallback!(self, |store| store.last_success(&key))?;
            if let Some(until) = last_success.map(|at| at + cooldown) {
                if !until.has_passed(now) {
                    return Ok(Some(Denial {
                        reason: DenialReason::Cooldown,
                        retry_after: until.remaining_since(now),
                    }));
                }
            }
        }

        let peeked: counters::Hit = with_fallback!(self, |store| {
            store.peek(&key, now, window, max_requests)
        })?;
        if peeked.allowed {
            return Ok(None);
        }
        log::debug!("`{identity}` exceeded the `{bucket}` rate");
        Ok(Some(self.exceeded(peeked, now)))
    }

    /// Builds the [`Denial`] of the exceeded rate window observed by the
    /// provided [`counters::Hit`].
    fn exceeded(&self, hit: counters::Hit, now: DateTime) -> Denial {
        let window = self.config.window;
        Denial {
            reason: DenialReason::RateExceeded,
            retry_after: hit
                .oldest
                .map_or(window, |oldest| (oldest + window).remaining_since(now)),
        }
    }

    /// Records an outcome of a request of the provided [`Identity`] in the
    /// provided [`Bucket`].
    ///
    /// A success clears the failures and starts the cooldown of a [`Bucket`]
    /// having one, while a failure may install a lockout.
    ///
    /// # Errors
    ///
    /// If both the shared and the local [`CounterStore`]s fail.
    pub async fn record(
        &self,
        identity: &Identity,
        bucket: Bucket,
        success: bool,
    ) -> Result<(), Traced<counters::Error>> {
        let key = Self::key(identity, bucket);
        let now = DateTime::now();
        let Config {
            window,
            cooldown,
            failure_threshold,
            lockout,
            ..
        } = self.config;

        if success {
            let retain = cooldown.max(window);
            return with_fallback!(self, |store| store.succeed(&key, now, retain));
        }

        let failure = Failure {
            threshold: failure_threshold,
            lockout,
            retain: lockout.max(window),
        };
        let locked_until: Option<DateTime> =
            with_fallback!(self, |store| store.fail(&key, now, failure))?;
        if let Some(until) = locked_until {
            log::warn!(
                "`{identity}` is locked out of `{bucket}` until {}",
                until.to_rfc3339(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod spec {
    use std::{net::IpAddr, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use common::DateTime;
    use tracerr::Traced;

    use crate::{
        domain::driver::Phone,
        infra::{
            counters::{self, Failure, Hit},
            CounterStore,
        },
    };

    use super::{Bucket, Config, Decision, DenialReason, Identity, RateLimiter};

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

    fn phone() -> Identity {
        Identity::Phone(Phone::new("+15550001234").unwrap().hash())
    }

    fn limiter(config: Config) -> RateLimiter {
        RateLimiter::new(config, Some(Arc::new(Unavailable)))
    }

    fn reason(decision: Decision) -> Option<DenialReason> {
        match decision {
            Decision::Allowed => None,
            Decision::Denied(d) => Some(d.reason),
        }
    }

    #[tokio::test]
    async fn degrades_to_local_window() {
        let limiter = limiter(Config {
            max_requests: 2,
            ..Config::default()
        });

        for _ in 0..2 {
            let d = limiter.check(&phone(), Bucket::PairingStart).await.unwrap();
            assert_eq!(d, Decision::Allowed);
        }
        let d = limiter.check(&phone(), Bucket::PairingStart).await.unwrap();

        assert_eq!(reason(d), Some(DenialReason::RateExceeded));
        assert_eq!(limiter.local().len(), 1);
    }

    #[tokio::test]
    async fn buckets_and_identities_are_independent() {
        let limiter = limiter(Config {
            max_requests: 1,
            ..Config::default()
        });
        let ip = Identity::Ip(IpAddr::from([10, 0, 0, 1]));

        for (identity, bucket) in [
            (phone(), Bucket::PairingStart),
            (phone(), Bucket::PairingActivate),
            (ip, Bucket::PairingStart),
        ] {
            let d = limiter.check(&identity, bucket).await.unwrap();
            assert_eq!(d, Decision::Allowed, "{identity} in {bucket}");
        }
    }

    #[tokio::test]
    async fn cooldown_follows_success() {
        let limiter = limiter(Config::default());

        limiter
            .record(&phone(), Bucket::PairingStart, true)
            .await
            .unwrap();
        let d = limiter.check(&phone(), Bucket::PairingStart).await.unwrap();

        let Decision::Denied(denial) = d else {
            panic!("expected cooldown, got {d:?}");
        };
        assert_eq!(denial.reason, DenialReason::Cooldown);
        assert!(denial.retry_after <= Duration::from_secs(30));
        assert!(denial.retry_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn lockout_preempts_everything() {
        let limiter = limiter(Config {
            failure_threshold: 3,
            ..Config::default()
        });

        for _ in 0..3 {
            limiter
                .record(&phone(), Bucket::PairingActivate, false)
                .await
                .unwrap();
        }
        let d = limiter
            .check(&phone(), Bucket::PairingActivate)
            .await
            .unwrap();

        let Decision::Denied(denial) = d else {
            panic!("expected lockout, got {d:?}");
        };
        assert_eq!(denial.reason, DenialReason::LockedOut);
        assert!(denial.retry_after > Duration::from_secs(14 * 60));

        limiter
            .record(&phone(), Bucket::PairingActivate, true)
            .await
            .unwrap();
        let d = limiter
            .check(&phone(), Bucket::PairingActivate)
            .await
            .unwrap();
        assert_eq!(d, Decision::Allowed);
    }

    #[tokio::test]
    async fn denial_of_one_identity_registers_no_others() {
        let limiter = limiter(Config {
            max_requests: 1,
            ..Config::default()
        });
        let ip = Identity::Ip(IpAddr::from([10, 0, 0, 1]));
        let d = limiter.check(&ip, Bucket::PairingStart).await.unwrap();
        assert_eq!(d, Decision::Allowed);

        let d = limiter
            .check_all(&[phone(), ip.clone()], Bucket::PairingStart)
            .await
            .unwrap();
        assert_eq!(reason(d), Some(DenialReason::RateExceeded));

        let d = limiter.check(&phone(), Bucket::PairingStart).await.unwrap();
        assert_eq!(d, Decision::Allowed);
    }

    #[tokio::test]
    async fn works_without_shared_store() {
        let limiter = RateLimiter::new(Config::default(), None);

        let d = limiter.check(&phone(), Bucket::PairingStart).await.unwrap();

        assert_eq!(d, Decision::Allowed);
    }
}
