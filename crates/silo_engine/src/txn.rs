//! Process-wide transaction registry.
//!
//! A handle is valid from `Begin` until the first of commit, rollback
//! or teardown. The registry map is guarded by a read-write lock:
//! readers on resolve, writers on begin/commit/rollback/teardown. The
//! individual transaction sits behind its own async mutex so that
//! commit and rollback can take ownership of it; callers are expected
//! to serialize use of a single handle themselves.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::mysql::MySql;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// One open transaction, pinned to a single backend connection.
pub struct TxnHandle {
    db_name: String,
    tx: Mutex<Option<sqlx::Transaction<'static, MySql>>>,
}

impl TxnHandle {
    pub fn new(db_name: impl Into<String>, tx: sqlx::Transaction<'static, MySql>) -> Self {
        Self {
            db_name: db_name.into(),
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Lock the underlying transaction. `None` inside the guard means
    /// commit or rollback already consumed it.
    pub async fn lock(&self) -> MutexGuard<'_, Option<sqlx::Transaction<'static, MySql>>> {
        self.tx.lock().await
    }
}

/// Id-keyed handle registry. Generic so the bookkeeping is testable
/// without a live backend; the engine uses [`TxnRegistry`].
pub struct Registry<H> {
    inner: RwLock<HashMap<String, Arc<H>>>,
}

pub type TxnRegistry = Registry<TxnHandle>;

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handle under a fresh opaque id and return the id.
    pub fn insert_new(&self, handle: H) -> String {
        let id = Uuid::new_v4().to_string();
        self.write().insert(id.clone(), Arc::new(handle));
        id
    }

    /// Look up a handle. An empty id never resolves.
    pub fn resolve(&self, id: &str) -> Option<Arc<H>> {
        if id.is_empty() {
            return None;
        }
        self.read().get(id).cloned()
    }

    /// Remove a handle unconditionally, returning it if present.
    pub fn remove(&self, id: &str) -> Option<Arc<H>> {
        if id.is_empty() {
            return None;
        }
        self.write().remove(id)
    }

    /// Take every registered handle, leaving the registry empty.
    pub fn drain(&self) -> Vec<(String, Arc<H>)> {
        self.write().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<H>>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<H>>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
