//! Gateway wiring: connect backends and caches, build the repository
//! stack, serve the framed RPC surface, release everything on
//! shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use silo_engine::{
    teardown, Backends, CachePool, CacheStore, CachingRepository, SentinelCache, SqlRepository,
    TxnRegistry,
};
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod server;
pub mod service;

use config::Config;
use service::DataService;

/// Run the gateway until `shutdown` fires, then release resources.
///
/// `ready` (used by tests) receives the bound address once the
/// listener is accepting connections.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
    ready: Option<oneshot::Sender<SocketAddr>>,
) -> anyhow::Result<()> {
    let mut pools = HashMap::new();
    for db in &config.databases {
        let pool = MySqlPoolOptions::new()
            .connect(&db.dsn)
            .await
            .with_context(|| format!("failed to connect to database '{}'", db.name))?;
        tracing::info!(backend = %db.name, "connected to database");
        pools.insert(db.name.clone(), pool);
    }
    let backends = Arc::new(Backends::new(pools));

    let cache = build_cache_pool(&config).await?;
    let registry = Arc::new(TxnRegistry::new());
    let repository = CachingRepository::new(
        SqlRepository::new(backends.clone(), registry.clone()),
        cache,
    );
    let service = Arc::new(DataService::new(Arc::new(repository)));

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;
    let local_addr = listener.local_addr()?;
    if let Some(ready) = ready {
        let _ = ready.send(local_addr);
    }
    tracing::info!(addr = %local_addr, "silo gateway listening");

    let result = server::serve(
        listener,
        service,
        Duration::from_secs(config.server.timeout_secs.max(1)),
        shutdown,
    )
    .await;

    teardown(&backends, &registry).await;
    tracing::info!("data resources closed");
    result
}

/// Eagerly connect one cache client per configured logical db tag.
async fn build_cache_pool(config: &Config) -> anyhow::Result<CachePool> {
    let Some(redis) = &config.redis else {
        return Ok(CachePool::empty());
    };
    if redis.logical_dbs.is_empty() {
        return Ok(CachePool::empty());
    }

    let mut stores: HashMap<u32, Arc<dyn CacheStore>> = HashMap::new();
    for &tag in &redis.logical_dbs {
        let store = SentinelCache::connect(
            &redis.master,
            &redis.sentinel_addrs,
            &redis.password,
            tag,
        )
        .await
        .with_context(|| format!("failed to connect to redis cache db {tag}"))?;
        tracing::info!(cache_db = tag, "connected to cache");
        stores.insert(tag, Arc::new(store));
    }
    Ok(CachePool::new(stores))
}
