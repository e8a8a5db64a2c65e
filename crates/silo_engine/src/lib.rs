//! Silo's core engine: structured-query translation, mutation
//! execution, the process-wide transaction registry, schema
//! introspection, the cache-through repository decorator and the
//! connection-retry policy.
//!
//! The engine owns two pieces of process state: the named backend
//! pools and the transaction registry. Everything else is per-request.
//! All entry points are safe for concurrent invocation; no application
//! lock is held across a driver call.

use std::collections::HashMap;

use sqlx::mysql::MySqlPool;
use tokio_util::sync::CancellationToken;

pub mod cache;
pub mod error;
mod introspect;
pub mod repo;
pub mod retry;
pub mod sqlgen;
pub mod txn;
pub mod value;

pub use cache::{CachePool, CacheStore, CachingRepository, MemoryCache, SentinelCache};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use repo::{Repository, SqlRepository};
pub use retry::RetryOptions;
pub use txn::TxnRegistry;

/// Named backend pools, created at startup and owned for the life of
/// the process.
#[derive(Default)]
pub struct Backends {
    pools: HashMap<String, MySqlPool>,
}

impl Backends {
    pub fn new(pools: HashMap<String, MySqlPool>) -> Self {
        Self { pools }
    }

    pub fn get(&self, name: &str) -> Option<&MySqlPool> {
        self.pools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub async fn close_all(&self) {
        for (name, pool) in &self.pools {
            tracing::debug!(backend = %name, "closing backend pool");
            pool.close().await;
        }
    }
}

/// Per-request state threaded through every engine entry point: the
/// caller's trace identifier (log-only) and a cancellation token that
/// aborts retry back-off waits.
#[derive(Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(trace_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            trace_id: trace_id.into(),
            cancel,
        }
    }
}

/// Release engine resources: roll back any residual transactions
/// (best-effort, errors swallowed), then close every backend pool.
pub async fn teardown(backends: &Backends, registry: &TxnRegistry) {
    let residual = registry.drain();
    if !residual.is_empty() {
        tracing::warn!(
            count = residual.len(),
            "found unfinished transactions during cleanup, attempting rollback"
        );
        for (id, handle) in residual {
            tracing::info!(transaction_id = %id, "rolling back transaction");
            if let Some(tx) = handle.lock().await.take() {
                if let Err(err) = tx.rollback().await {
                    tracing::warn!(
                        transaction_id = %id,
                        error = %err,
                        "rollback failed during cleanup"
                    );
                }
            }
        }
    }
    backends.close_all().await;
}
