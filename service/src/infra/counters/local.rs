//! [`Local`] [`CounterStore`] implementation.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use common::DateTime;
use parking_lot::Mutex;
use tracerr::Traced;

use super::{CounterStore, Error, Failure, Hit};

/// In-process [`CounterStore`].
///
/// Consistent within a single process only.
#[derive(Debug, Default)]
pub struct Local {
    /// Counters by their keys.
    entries: Mutex<HashMap<String, Entry>>,
}

/// Counters of a single key.
#[derive(Debug)]
struct Entry {
    /// Moments of the hits in the current window, oldest first.
    hits: VecDeque<DateTime>,

    /// Moment of the last success.
    last_success: Option<DateTime>,

    /// Number of consecutive failures.
    failures: u32,

    /// Moment the lockout ends at.
    locked_until: Option<DateTime>,

    /// Moment this [`Entry`] was touched last.
    touched_at: DateTime,
}

impl Entry {
    /// Creates a new empty [`Entry`] touched at the provided moment.
    fn new(at: DateTime) -> Self {
        Self {
            hits: VecDeque::new(),
            last_success: None,
            failures: 0,
            locked_until: None,
            touched_at: at,
        }
    }
}

impl Local {
    /// Runs the provided function over the [`Entry`] of the provided `key`.
    fn with_entry<R>(
        &self,
        key: &str,
        at: DateTime,
        f: impl FnOnce(&mut Entry) -> R,
    ) -> R {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(at));
        entry.touched_at = entry.touched_at.max(at);
        f(entry)
    }

    /// Evicts the entries not touched for the provided `idle` duration by
    /// the provided moment, unless they're still locked out.
    ///
    /// Returns the number of evicted entries.
    pub fn prune(&self, now: DateTime, idle: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| {
            !(e.touched_at + idle).has_passed(now)
                || e.locked_until.is_some_and(|until| !until.has_passed(now))
        });
        before - entries.len()
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Indicates whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CounterStore for Local {
    async fn hit(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<Error>> {
        Ok(self.with_entry(key, at, |e| {
            let horizon = at - window;
            while e.hits.front().is_some_and(|h| h.has_passed(horizon)) {
                _ = e.hits.pop_front();
            }

            let count = u32::try_from(e.hits.len()).unwrap_or(u32::MAX);
            let allowed = count < limit;
            if allowed {
                e.hits.push_back(at);
            }
            Hit {
                allowed,
                count: if allowed { count + 1 } else { count },
                oldest: e.hits.front().copied(),
            }
        }))
    }

    async fn peek(
        &self,
        key: &str,
        at: DateTime,
        window: Duration,
        limit: u32,
    ) -> Result<Hit, Traced<Error>> {
        let horizon = at - window;
        let entries = self.entries.lock();
        let mut live = entries
            .get(key)
            .into_iter()
            .flat_map(|e| e.hits.iter())
            .filter(|h| !h.has_passed(horizon));

        let oldest = live.next().copied();
        let count =
            u32::try_from(live.count() + usize::from(oldest.is_some()))
                .unwrap_or(u32::MAX);
        Ok(Hit {
            allowed: count < limit,
            count,
            oldest,
        })
    }

    async fn lockout(
        &self,
        key: &str,
        at: DateTime,
    ) -> Result<Option<DateTime>, Traced<Error>> {
        Ok(self
            .entries
            .lock()
            .get(key)
            .and_then(|e| e.locked_until)
            .filter(|until| !until.has_passed(at)))
    }

    async fn last_success(
        &self,
        key: &str,
    ) -> Result<Option<DateTime>, Traced<Error>> {
        Ok(self.entries.lock().get(key).and_then(|e| e.last_success))
    }

    async fn succeed(
        &self,
        key: &str,
        at: DateTime,
        _: Duration,
    ) -> Result<(), Traced<Error>> {
        self.with_entry(key, at, |e| {
            e.last_success = Some(at);
            e.failures = 0;
            e.locked_until = None;
        });
        Ok(())
    }

    async fn fail(
        &self,
        key: &str,
        at: DateTime,
        failure: Failure,
    ) -> Result<Option<DateTime>, Traced<Error>> {
        Ok(self.with_entry(key, at, |e| {
            e.failures = e.failures.saturating_add(1);
            if e.failures < failure.threshold {
                return None;
            }
            e.failures = 0;
            let until = at + failure.lockout;
            e.locked_until = Some(until);
            Some(until)
        }))
    }
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::DateTime;

    use crate::infra::counters::{CounterStore as _, Failure};

    use super::Local;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn sliding_window_limits_hits() {
        let store = Local::default();
        let t0 = DateTime::now();

        for i in 1..=3 {
            let hit = store.hit("k", t0, WINDOW, 3).await.unwrap();
            assert!(hit.allowed);
            assert_eq!(hit.count, i);
        }

        let denied = store.hit("k", t0, WINDOW, 3).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.oldest, Some(t0));

        let later = t0 + WINDOW;
        assert!(store.hit("k", later, WINDOW, 3).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn peek_registers_nothing() {
        let store = Local::default();
        let now = DateTime::now();
        _ = store.hit("k", now, WINDOW, 2).await.unwrap();

        for _ in 0..3 {
            let peeked = store.peek("k", now, WINDOW, 2).await.unwrap();
            assert!(peeked.allowed);
            assert_eq!(peeked.count, 1);
            assert_eq!(peeked.oldest, Some(now));
        }
        assert!(store.peek("none", now, WINDOW, 2).await.unwrap().allowed);
        assert_eq!(store.len(), 1);

        _ = store.hit("k", now, WINDOW, 2).await.unwrap();
        assert!(!store.peek("k", now, WINDOW, 2).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = Local::default();
        let now = DateTime::now();

        assert!(store.hit("a", now, WINDOW, 1).await.unwrap().allowed);
        assert!(!store.hit("a", now, WINDOW, 1).await.unwrap().allowed);
        assert!(store.hit("b", now, WINDOW, 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn failures_install_lockout_cleared_by_success() {
        let store = Local::default();
        let now = DateTime::now();
        let failure = Failure {
            threshold: 2,
            lockout: Duration::from_secs(900),
            retain: WINDOW,
        };

        assert_eq!(store.fail("k", now, failure).await.unwrap(), None);
        let until = store.fail("k", now, failure).await.unwrap();
        assert_eq!(until, Some(now + Duration::from_secs(900)));
        assert_eq!(store.lockout("k", now).await.unwrap(), until);
        assert_eq!(
            store.lockout("k", now + Duration::from_secs(900)).await.unwrap(),
            None,
        );

        store.succeed("k", now, WINDOW).await.unwrap();
        assert_eq!(store.lockout("k", now).await.unwrap(), None);
        assert_eq!(store.last_success("k").await.unwrap(), Some(now));
    }

    #[tokio::test]
    async fn prunes_idle_entries() {
        let store = Local::default();
        let now = DateTime::now();
        _ = store.hit("idle", now, WINDOW, 5).await.unwrap();
        _ = store
            .fail(
                "locked",
                now,
                Failure {
                    threshold: 1,
                    lockout: Duration::from_secs(3600),
                    retain: WINDOW,
                },
            )
            .await
            .unwrap();

        let evicted = store.prune(now + Duration::from_secs(600), WINDOW);

        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 1);
    }
}
