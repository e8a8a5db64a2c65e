//! Read-through cache over the repository.
//!
//! The decorator serves point reads (`field = literal` on a declared
//! cache field) from a key-value store and invalidates the matching
//! key when a mutation touches it. Cache failures never surface to the
//! caller; every path degrades to the database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::RedisConnectionInfo;
use silo_proto::{
    BeginTransactionRequest, BeginTransactionResponse, Condition, DeleteRequest,
    DescribeTableRequest, DescribeTableResponse, ExecRawSqlRequest, ExecRawSqlResponse,
    InsertRequest, ListTablesRequest, ListTablesResponse, MutationResponse, Operand, Operator,
    QueryRequest, QueryResponse, TableRef, TransactionRequest, UpdateRequest, Value, WhereClause,
};

use crate::error::EngineResult;
use crate::repo::Repository;
use crate::RequestContext;

/// TTL applied when the request does not override it.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Key-value store operations the cache layer needs. Implementations
/// must be safe for concurrent use; errors are logged and swallowed by
/// the caller.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

/// One store per known logical database tag, built at startup.
#[derive(Clone, Default)]
pub struct CachePool {
    stores: HashMap<u32, Arc<dyn CacheStore>>,
}

impl CachePool {
    pub fn new(stores: HashMap<u32, Arc<dyn CacheStore>>) -> Self {
        Self { stores }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: u32) -> Option<Arc<dyn CacheStore>> {
        self.stores.get(&tag).cloned()
    }
}

/// Failover-aware store backed by a Redis sentinel deployment. The
/// sentinel client re-resolves the master on each connection grab, so
/// a failover only costs the next command a re-dial.
pub struct SentinelCache {
    client: tokio::sync::Mutex<SentinelClient>,
}

impl SentinelCache {
    /// Build a client for one logical database tag and eagerly verify
    /// connectivity. Tag `n` selects redis logical db `n - 1`.
    pub async fn connect(
        master: &str,
        sentinel_addrs: &[String],
        password: &str,
        tag: u32,
    ) -> anyhow::Result<Self> {
        let node_info = SentinelNodeConnectionInfo {
            tls_mode: None,
            redis_connection_info: Some(RedisConnectionInfo {
                db: i64::from(tag.saturating_sub(1)),
                password: (!password.is_empty()).then(|| password.to_string()),
                ..RedisConnectionInfo::default()
            }),
        };
        let urls: Vec<String> = sentinel_addrs
            .iter()
            .map(|addr| format!("redis://{addr}"))
            .collect();
        let mut client = SentinelClient::build(
            urls,
            master.to_string(),
            Some(node_info),
            SentinelServerType::Master,
        )
        .context("build sentinel client")?;

        let mut conn = client
            .get_async_connection()
            .await
            .with_context(|| format!("connect to redis master for cache db {tag}"))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .with_context(|| format!("ping redis cache db {tag}"))?;

        Ok(Self {
            client: tokio::sync::Mutex::new(client),
        })
    }

    async fn conn(&self) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        self.client
            .lock()
            .await
            .get_async_connection()
            .await
            .context("acquire redis connection")
    }
}

#[async_trait]
impl CacheStore for SentinelCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-memory store with expiry, for tests and local development.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL for a live entry.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let (_, deadline) = entries.get(key)?;
        deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .map(|(_, deadline)| deadline.map(|d| d > Instant::now()).unwrap_or(true))
            .unwrap_or(false)
    }

    /// Seed an entry directly, bypassing the store API.
    pub fn put_raw(&self, key: &str, value: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value, None));
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).and_then(|(value, deadline)| {
            match deadline {
                Some(d) if *d <= Instant::now() => None,
                _ => Some(value.clone()),
            }
        }))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value.to_vec(), Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, deadline)) = entries.get_mut(key) {
            *deadline = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// The cache-through decorator. Wraps any repository behind the same
/// contract; wiring happens once at construction.
pub struct CachingRepository<R> {
    wrapped: R,
    cache: CachePool,
}

impl<R: Repository> CachingRepository<R> {
    pub fn new(wrapped: R, cache: CachePool) -> Self {
        Self { wrapped, cache }
    }
}

/// Accept a where tree as a point read: a single non-nested condition
/// on exactly `cache_by_field`, operator `EQ`, with a non-null scalar
/// literal operand. Anything else falls through to the database.
fn point_read_value<'a>(
    where_clause: Option<&'a WhereClause>,
    cache_by_field: &str,
) -> Option<&'a Value> {
    let WhereClause::Condition(Condition {
        field,
        operator: Operator::Eq,
        operand: Some(Operand::Literal(value)),
    }) = where_clause?
    else {
        return None;
    };
    if field.as_str() != cache_by_field {
        return None;
    }
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        _ => Some(value),
    }
}

fn cache_key(table: &TableRef, field: &str, value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!(
        "{}:{}:{}:{}",
        table.db_name, table.table_name, field, rendered
    )
}

fn cache_ttl(cache_ttl_seconds: u64) -> Duration {
    if cache_ttl_seconds > 0 {
        Duration::from_secs(cache_ttl_seconds)
    } else {
        DEFAULT_CACHE_TTL
    }
}

impl<R: Repository> CachingRepository<R> {
    /// Invalidate the point-read key touched by a mutation, if any.
    async fn invalidate(
        &self,
        ctx: &RequestContext,
        table: &TableRef,
        where_clause: Option<&WhereClause>,
        cache_by_field: &str,
        redis_db: u32,
    ) {
        let Some(value) = point_read_value(where_clause, cache_by_field) else {
            return;
        };
        let Some(store) = self.cache.get(redis_db) else {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                redis_db,
                "no cache client for db, skip cache invalidation"
            );
            return;
        };
        let key = cache_key(table, cache_by_field, value);
        if let Err(err) = store.del(&key).await {
            tracing::error!(
                trace_id = %ctx.trace_id,
                key = %key,
                error = %err,
                "failed to invalidate cache key"
            );
        }
    }
}

#[async_trait]
impl<R: Repository> Repository for CachingRepository<R> {
    async fn query(&self, ctx: &RequestContext, req: &QueryRequest) -> EngineResult<QueryResponse> {
        // A projection could cache an incomplete entity and poison
        // later full reads, so any select list disables caching.
        if req.cache_by_field.is_empty() || req.redis_db == 0 || !req.select_fields.is_empty() {
            return self.wrapped.query(ctx, req).await;
        }

        let Some(value) = point_read_value(req.where_clause.as_ref(), &req.cache_by_field) else {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                field = %req.cache_by_field,
                "query condition does not match the point-read pattern, skip cache"
            );
            return self.wrapped.query(ctx, req).await;
        };

        let Some(store) = self.cache.get(req.redis_db) else {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                redis_db = req.redis_db,
                "no cache client for db, skip cache"
            );
            return self.wrapped.query(ctx, req).await;
        };

        let key = cache_key(&req.table, &req.cache_by_field, value);
        let ttl = cache_ttl(req.cache_ttl_seconds);

        match store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<QueryResponse>(&bytes) {
                Ok(response) => {
                    if let Err(err) = store.expire(&key, ttl).await {
                        tracing::error!(
                            trace_id = %ctx.trace_id,
                            key = %key,
                            error = %err,
                            "failed to refresh cache TTL"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    tracing::error!(
                        trace_id = %ctx.trace_id,
                        key = %key,
                        error = %err,
                        "failed to decode cached response, falling back to database"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    trace_id = %ctx.trace_id,
                    key = %key,
                    error = %err,
                    "cache fetch failed, falling back to database"
                );
            }
        }

        let response = self.wrapped.query(ctx, req).await?;

        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if let Err(err) = store.set_ex(&key, &bytes, ttl).await {
                    tracing::error!(
                        trace_id = %ctx.trace_id,
                        key = %key,
                        error = %err,
                        "failed to populate cache"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    trace_id = %ctx.trace_id,
                    key = %key,
                    error = %err,
                    "failed to encode response for caching"
                );
            }
        }

        Ok(response)
    }

    /// Insert does not invalidate: no point-read key exists for a row
    /// until the first read caches it.
    async fn insert(
        &self,
        ctx: &RequestContext,
        req: &InsertRequest,
    ) -> EngineResult<MutationResponse> {
        self.wrapped.insert(ctx, req).await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        req: &UpdateRequest,
    ) -> EngineResult<MutationResponse> {
        let response = self.wrapped.update(ctx, req).await?;
        if response.affected_rows > 0 && !req.cache_by_field.is_empty() && req.redis_db > 0 {
            self.invalidate(
                ctx,
                &req.table,
                req.where_clause.as_ref(),
                &req.cache_by_field,
                req.redis_db,
            )
            .await;
        }
        Ok(response)
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        req: &DeleteRequest,
    ) -> EngineResult<MutationResponse> {
        let response = self.wrapped.delete(ctx, req).await?;
        if response.affected_rows > 0 && !req.cache_by_field.is_empty() && req.redis_db > 0 {
            self.invalidate(
                ctx,
                &req.table,
                req.where_clause.as_ref(),
                &req.cache_by_field,
                req.redis_db,
            )
            .await;
        }
        Ok(response)
    }

    async fn begin_transaction(
        &self,
        ctx: &RequestContext,
        req: &BeginTransactionRequest,
    ) -> EngineResult<BeginTransactionResponse> {
        self.wrapped.begin_transaction(ctx, req).await
    }

    async fn commit_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()> {
        self.wrapped.commit_transaction(ctx, req).await
    }

    async fn rollback_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()> {
        self.wrapped.rollback_transaction(ctx, req).await
    }

    async fn list_tables(
        &self,
        ctx: &RequestContext,
        req: &ListTablesRequest,
    ) -> EngineResult<ListTablesResponse> {
        self.wrapped.list_tables(ctx, req).await
    }

    async fn describe_table(
        &self,
        ctx: &RequestContext,
        req: &DescribeTableRequest,
    ) -> EngineResult<DescribeTableResponse> {
        self.wrapped.describe_table(ctx, req).await
    }

    async fn exec_raw_sql(
        &self,
        ctx: &RequestContext,
        req: &ExecRawSqlRequest,
    ) -> EngineResult<ExecRawSqlResponse> {
        self.wrapped.exec_raw_sql(ctx, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Scripted repository: counts calls, returns canned responses.
    #[derive(Default)]
    struct StubRepo {
        query_calls: AtomicU64,
        rows: Vec<silo_proto::Row>,
        affected_rows: u64,
    }

    impl StubRepo {
        fn with_rows(rows: Vec<silo_proto::Row>) -> Self {
            Self {
                rows,
                ..Self::default()
            }
        }

        fn with_affected(affected_rows: u64) -> Self {
            Self {
                affected_rows,
                ..Self::default()
            }
        }

        fn queries(&self) -> u64 {
            self.query_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Repository for StubRepo {
        async fn query(
            &self,
            _ctx: &RequestContext,
            _req: &QueryRequest,
        ) -> EngineResult<QueryResponse> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResponse {
                rows: self.rows.clone(),
            })
        }

        async fn insert(
            &self,
            _ctx: &RequestContext,
            _req: &InsertRequest,
        ) -> EngineResult<MutationResponse> {
            Ok(MutationResponse {
                affected_rows: self.affected_rows,
            })
        }

        async fn update(
            &self,
            _ctx: &RequestContext,
            _req: &UpdateRequest,
        ) -> EngineResult<MutationResponse> {
            Ok(MutationResponse {
                affected_rows: self.affected_rows,
            })
        }

        async fn delete(
            &self,
            _ctx: &RequestContext,
            _req: &DeleteRequest,
        ) -> EngineResult<MutationResponse> {
            Ok(MutationResponse {
                affected_rows: self.affected_rows,
            })
        }

        async fn begin_transaction(
            &self,
            _ctx: &RequestContext,
            _req: &BeginTransactionRequest,
        ) -> EngineResult<BeginTransactionResponse> {
            Err(EngineError::invalid_argument("not scripted"))
        }

        async fn commit_transaction(
            &self,
            _ctx: &RequestContext,
            _req: &TransactionRequest,
        ) -> EngineResult<()> {
            Err(EngineError::invalid_argument("not scripted"))
        }

        async fn rollback_transaction(
            &self,
            _ctx: &RequestContext,
            _req: &TransactionRequest,
        ) -> EngineResult<()> {
            Err(EngineError::invalid_argument("not scripted"))
        }

        async fn list_tables(
            &self,
            _ctx: &RequestContext,
            _req: &ListTablesRequest,
        ) -> EngineResult<ListTablesResponse> {
            Err(EngineError::invalid_argument("not scripted"))
        }

        async fn describe_table(
            &self,
            _ctx: &RequestContext,
            _req: &DescribeTableRequest,
        ) -> EngineResult<DescribeTableResponse> {
            Err(EngineError::invalid_argument("not scripted"))
        }

        async fn exec_raw_sql(
            &self,
            _ctx: &RequestContext,
            _req: &ExecRawSqlRequest,
        ) -> EngineResult<ExecRawSqlResponse> {
            Err(EngineError::invalid_argument("not scripted"))
        }
    }

    fn point_eq(field: &str, value: serde_json::Value) -> WhereClause {
        WhereClause::Condition(Condition {
            field: field.into(),
            operator: Operator::Eq,
            operand: Some(Operand::Literal(value)),
        })
    }

    fn cached_query(redis_db: u32) -> QueryRequest {
        QueryRequest {
            table: TableRef::new("db", "users"),
            where_clause: Some(point_eq("uid", json!(42))),
            cache_by_field: "uid".into(),
            redis_db,
            ..QueryRequest::default()
        }
    }

    fn pool_with(store: Arc<MemoryCache>) -> CachePool {
        CachePool::new(HashMap::from([(1u32, store as Arc<dyn CacheStore>)]))
    }

    #[test]
    fn cache_key_renders_scalars_bare() {
        let table = TableRef::new("db", "users");
        assert_eq!(cache_key(&table, "uid", &json!(42)), "db:users:uid:42");
        assert_eq!(cache_key(&table, "uid", &json!("abc")), "db:users:uid:abc");
        assert_eq!(cache_key(&table, "uid", &json!(true)), "db:users:uid:true");
    }

    #[test]
    fn point_read_rejects_lists_structures_null_and_nested_clauses() {
        assert!(point_read_value(Some(&point_eq("uid", json!([1]))), "uid").is_none());
        assert!(point_read_value(Some(&point_eq("uid", json!({"a": 1}))), "uid").is_none());
        assert!(point_read_value(Some(&point_eq("uid", json!(null))), "uid").is_none());
        assert!(point_read_value(Some(&point_eq("other", json!(1))), "uid").is_none());
        assert!(point_read_value(None, "uid").is_none());

        let nested = WhereClause::Nested(silo_proto::NestedClause {
            logical_operator: silo_proto::LogicalOperator::And,
            clauses: vec![point_eq("uid", json!(1))],
        });
        assert!(
            point_read_value(Some(&nested), "uid").is_none(),
            "a nested clause is never a point read"
        );

        assert_eq!(
            point_read_value(Some(&point_eq("uid", json!(42))), "uid"),
            Some(&json!(42))
        );
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache_and_refreshes_ttl() {
        let store = Arc::new(MemoryCache::new());
        let repo = CachingRepository::new(
            StubRepo::with_rows(vec![silo_proto::Row::from([(
                "uid".to_string(),
                json!(42),
            )])]),
            pool_with(store.clone()),
        );
        let ctx = RequestContext::new("test");
        let req = cached_query(1);

        let first = repo.query(&ctx, &req).await.expect("first query");
        assert_eq!(first.rows.len(), 1);
        assert_eq!(repo.wrapped.queries(), 1);
        assert!(store.contains("db:users:uid:42"), "miss should populate");
        let initial_ttl = store.ttl_of("db:users:uid:42").expect("ttl set");
        assert!(initial_ttl <= DEFAULT_CACHE_TTL);

        let second = repo.query(&ctx, &req).await.expect("second query");
        assert_eq!(second, first);
        assert_eq!(repo.wrapped.queries(), 1, "hit must not reach the database");
        assert!(
            store.ttl_of("db:users:uid:42").is_some(),
            "hit should refresh the TTL"
        );
    }

    #[tokio::test]
    async fn custom_ttl_overrides_the_default() {
        let store = Arc::new(MemoryCache::new());
        let repo = CachingRepository::new(StubRepo::default(), pool_with(store.clone()));
        let ctx = RequestContext::new("test");
        let mut req = cached_query(1);
        req.cache_ttl_seconds = 60;

        repo.query(&ctx, &req).await.expect("query");
        let ttl = store.ttl_of("db:users:uid:42").expect("ttl set");
        assert!(ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn select_fields_disable_caching() {
        let store = Arc::new(MemoryCache::new());
        let repo = CachingRepository::new(StubRepo::default(), pool_with(store.clone()));
        let ctx = RequestContext::new("test");
        let mut req = cached_query(1);
        req.select_fields = vec!["uid".into()];

        repo.query(&ctx, &req).await.expect("query");
        assert_eq!(repo.wrapped.queries(), 1);
        assert!(
            !store.contains("db:users:uid:42"),
            "projection must not populate the cache"
        );
    }

    #[tokio::test]
    async fn missing_cache_client_falls_through() {
        let repo = CachingRepository::new(StubRepo::default(), CachePool::empty());
        let ctx = RequestContext::new("test");
        let req = cached_query(3);

        repo.query(&ctx, &req).await.expect("query");
        assert_eq!(repo.wrapped.queries(), 1);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_falls_through_to_database() {
        let store = Arc::new(MemoryCache::new());
        store.put_raw("db:users:uid:42", b"not json".to_vec());
        let repo = CachingRepository::new(StubRepo::default(), pool_with(store.clone()));
        let ctx = RequestContext::new("test");

        repo.query(&ctx, &cached_query(1))
            .await
            .expect("corrupt entry must not fail the request");
        assert_eq!(repo.wrapped.queries(), 1);
    }

    #[tokio::test]
    async fn update_invalidates_only_when_rows_were_affected() {
        let store = Arc::new(MemoryCache::new());
        store.put_raw("db:users:uid:42", b"{}".to_vec());

        let zero = CachingRepository::new(StubRepo::with_affected(0), pool_with(store.clone()));
        let ctx = RequestContext::new("test");
        let req = UpdateRequest {
            table: TableRef::new("db", "users"),
            data: silo_proto::Row::from([("name".to_string(), json!("x"))]),
            where_clause: Some(point_eq("uid", json!(42))),
            cache_by_field: "uid".into(),
            redis_db: 1,
            ..UpdateRequest::default()
        };

        zero.update(&ctx, &req).await.expect("update");
        assert!(
            store.contains("db:users:uid:42"),
            "no rows affected, no invalidation"
        );

        let hit = CachingRepository::new(StubRepo::with_affected(2), pool_with(store.clone()));
        hit.update(&ctx, &req).await.expect("update");
        assert!(
            !store.contains("db:users:uid:42"),
            "affected rows must invalidate the key"
        );
    }

    #[tokio::test]
    async fn delete_with_non_point_predicate_does_not_invalidate() {
        let store = Arc::new(MemoryCache::new());
        store.put_raw("db:users:uid:42", b"{}".to_vec());
        let repo = CachingRepository::new(StubRepo::with_affected(5), pool_with(store.clone()));
        let ctx = RequestContext::new("test");
        let req = DeleteRequest {
            table: TableRef::new("db", "users"),
            where_clause: Some(WhereClause::Condition(Condition {
                field: "uid".into(),
                operator: Operator::Gt,
                operand: Some(Operand::Literal(json!(1))),
            })),
            cache_by_field: "uid".into(),
            redis_db: 1,
            ..DeleteRequest::default()
        };

        repo.delete(&ctx, &req).await.expect("delete");
        assert!(
            store.contains("db:users:uid:42"),
            "non-EQ predicates never map to a key"
        );
    }
}
