use std::{
    io,
    sync::{Arc, OnceLock},
};

use application::{Args, Config, Service};
use service::infra::{gateway::r#static, CounterStore, Memory, Static};
use tracing as log;
use tracing_subscriber::{
    filter::filter_fn,
    layer::{Layer as _, SubscriberExt as _},
    util::SubscriberInitExt as _,
};

const STDERR_LEVELS: &[log::Level] = &[log::Level::WARN, log::Level::ERROR];

static LOG_LEVEL: OnceLock<log::Level> = OnceLock::new();

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_thread_names(true)
                .with_writer(io::stdout)
                .with_filter(filter_fn(|meta| {
                    meta.is_span()
                        || (!STDERR_LEVELS.contains(meta.level()))
                            && LOG_LEVEL
                                .get()
                                .copied()
                                .unwrap_or(log::Level::INFO)
                                >= *meta.level()
                })),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_thread_names(true)
                .with_writer(io::stderr)
                .with_filter(filter_fn(|meta| {
                    meta.is_span()
                        || (STDERR_LEVELS.contains(meta.level()))
                            && LOG_LEVEL
                                .get()
                                .copied()
                                .unwrap_or(log::Level::INFO)
                                >= *meta.level()
                })),
        )
        .init();

    _ = start().await;
}

async fn start() -> Result<(), ()> {
    let Args { config, check } = Args::parse().map_err(|e| {
        log::error!("failed to parse command line arguments: {e}");
    })?;

    let Config {
        service: service_config,
        database,
        redis,
        directory,
        log,
    } = Config::new(config).map_err(|e| {
        log::error!("failed to load `Config`: {e}");
    })?;

    LOG_LEVEL
        .set(log.level.into())
        .unwrap_or_else(|_| unreachable!("first initialization"));

    let service_config = service::Config::try_from(service_config)
        .map_err(|e| {
            log::error!("invalid `service` configuration: {e}");
        })?;
    let directory = r#static::Directory::try_from(directory).map_err(|e| {
        log::error!("invalid `directory` configuration: {e}");
    })?;
    if check {
        log::info!("configuration is valid");
        return Ok(());
    }
    let counters = counter_store(redis).await?;

    let (_service, background) = Service::new(
        service_config,
        Memory::new(database.into()),
        Static::new(directory),
        counters,
    );

    log::info!("arrival coordination service started");

    background.await.map_err(|e| {
        log::error!("background task failed: {e}");
    })
}

/// Connects the shared [`CounterStore`], if configured.
#[cfg(feature = "redis")]
async fn counter_store(
    redis: application::config::Redis,
) -> Result<Option<Arc<dyn CounterStore>>, ()> {
    let Some(url) = redis.url else {
        return Ok(None);
    };
    let store = service::infra::counters::Redis::connect(&url)
        .await
        .map_err(|e| {
            log::error!("failed to connect to Redis: {e}");
        })?;
    Ok(Some(Arc::new(store)))
}

/// Connects the shared [`CounterStore`], if configured.
#[cfg(not(feature = "redis"))]
#[expect(clippy::unused_async, reason = "matches the `redis` feature")]
async fn counter_store(
    redis: application::config::Redis,
) -> Result<Option<Arc<dyn CounterStore>>, ()> {
    if redis.url.is_some() {
        log::warn!(
            "`redis.url` is ignored, as built without `redis` feature; \
             rate limiting counters stay in-process",
        );
    }
    Ok(None)
}
