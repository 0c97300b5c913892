//! Background environment for running [`Task`]s.

use std::{
    error::Error,
    future::{Future, IntoFuture},
};

use derive_more::{Display, Error as StdError};
use futures::{
    future::{self, LocalBoxFuture},
    FutureExt as _,
};
use tokio::task::{self, JoinHandle, LocalSet};
use tracing as log;

#[cfg(doc)]
use crate::Task;

/// Background environment for running [`Task`]s.
///
/// Runs until the first of its [`Task`]s stops.
#[derive(Debug, Default)]
pub struct Background {
    /// Local set the [`Task`]s are driven by.
    set: LocalSet,

    /// Named handles of the spawned [`Task`]s.
    handles: Vec<(&'static str, JoinHandle<Result<(), Box<dyn Error>>>)>,
}

impl Background {
    /// Spawns a new [`Task`] under the provided `name`.
    pub fn spawn<F, E>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + 'static,
        E: Error + 'static,
    {
        let handle = self.set.spawn_local(async move {
            log::debug!("`{name}` task started");
            future.await.map_err(|e| Box::<dyn Error>::from(Box::new(e)))
        });
        self.handles.push((name, handle));
    }

    /// Returns the number of spawned [`Task`]s.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Indicates whether no [`Task`]s are spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl IntoFuture for Background {
    type Output = Result<(), Stopped>;
    type IntoFuture = LocalBoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let Self { set, handles } = self;
        if handles.is_empty() {
            return future::ready(Ok(())).boxed_local();
        }

        let first_stopped = future::select_all(handles.into_iter().map(
            |(name, handle)| {
                handle
                    .map(move |res| match res {
                        Ok(Ok(())) => Stopped { task: name, cause: None },
                        Ok(Err(e)) => Stopped {
                            task: name,
                            cause: Some(e.to_string()),
                        },
                        Err(e) => Stopped {
                            task: name,
                            cause: Some(panicked(&e)),
                        },
                    })
                    .boxed_local()
            },
        ));
        async move {
            let (stopped, ..) = set.run_until(first_stopped).await;
            Err(stopped)
        }
        .boxed_local()
    }
}

/// Describes the provided [`task::JoinError`].
fn panicked(err: &task::JoinError) -> String {
    if err.is_panic() {
        "panicked".to_owned()
    } else {
        err.to_string()
    }
}

/// Error of a [`Background`] [`Task`] having stopped.
#[derive(Clone, Debug, Display, StdError)]
#[display(
    "`{task}` task stopped{}",
    cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default(),
)]
pub struct Stopped {
    /// Name of the stopped [`Task`].
    pub task: &'static str,

    /// Description of the failure, if the [`Task`] failed.
    pub cause: Option<String>,
}

#[cfg(test)]
mod spec {
    use std::{convert::Infallible, future::IntoFuture as _, io};

    use super::Background;

    #[tokio::test]
    async fn reports_first_stopped_task() {
        let mut bg = Background::default();
        bg.spawn("forever", futures::future::pending::<Result<(), Infallible>>());
        bg.spawn("failing", async {
            Err(io::Error::other("boom"))
        });
        assert_eq!(bg.len(), 2);

        let stopped = bg.into_future().await.unwrap_err();

        assert_eq!(stopped.task, "failing");
        assert_eq!(stopped.to_string(), "`failing` task stopped: boom");
    }

    #[tokio::test]
    async fn nothing_to_run() {
        let bg = Background::default();
        assert!(bg.is_empty());

        bg.into_future().await.unwrap();
    }
}
