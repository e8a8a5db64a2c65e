//! The repository: structured queries, mutations and transaction
//! control against the configured backends.
//!
//! Request validation and fragment building happen before any backend
//! is touched, so user errors never cost a connection. Operations
//! routed through a pool pass the retry policy; operations pinned to an
//! open transaction do not — a transport fault invalidates the
//! transaction, so retrying on the same handle cannot succeed.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use silo_proto::{
    BeginTransactionRequest, BeginTransactionResponse, ConflictAction, DeleteRequest,
    DescribeTableRequest, DescribeTableResponse, ExecRawSqlRequest, ExecRawSqlResponse,
    InsertRequest, ListTablesRequest, ListTablesResponse, MutationResponse, QueryRequest,
    QueryResponse, Row, TransactionRequest, UpdateRequest,
};
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlRow};
use sqlx::query::Query;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::retry::{with_retry, RetryError, RetryOptions};
use crate::sqlgen::{self, quote_ident};
use crate::txn::{TxnHandle, TxnRegistry};
use crate::value::{bind_value, from_wire, row_to_wire, SqlValue};
use crate::{Backends, RequestContext};

/// The engine surface. The caching layer decorates this same contract,
/// substituted at construction time.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn query(&self, ctx: &RequestContext, req: &QueryRequest) -> EngineResult<QueryResponse>;

    async fn insert(
        &self,
        ctx: &RequestContext,
        req: &InsertRequest,
    ) -> EngineResult<MutationResponse>;

    async fn update(
        &self,
        ctx: &RequestContext,
        req: &UpdateRequest,
    ) -> EngineResult<MutationResponse>;

    async fn delete(
        &self,
        ctx: &RequestContext,
        req: &DeleteRequest,
    ) -> EngineResult<MutationResponse>;

    async fn begin_transaction(
        &self,
        ctx: &RequestContext,
        req: &BeginTransactionRequest,
    ) -> EngineResult<BeginTransactionResponse>;

    /// Commit fails with `INVALID_TRANSACTION_ID` when the id is
    /// unknown. The registry entry is removed whether or not the
    /// backend call succeeds.
    async fn commit_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()>;

    /// Rollback of an unknown id succeeds: the transaction is treated
    /// as already rolled back. This is deliberately asymmetric with
    /// commit so cancellation paths cannot double-fault.
    async fn rollback_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()>;

    async fn list_tables(
        &self,
        ctx: &RequestContext,
        req: &ListTablesRequest,
    ) -> EngineResult<ListTablesResponse>;

    async fn describe_table(
        &self,
        ctx: &RequestContext,
        req: &DescribeTableRequest,
    ) -> EngineResult<DescribeTableResponse>;

    async fn exec_raw_sql(
        &self,
        ctx: &RequestContext,
        req: &ExecRawSqlRequest,
    ) -> EngineResult<ExecRawSqlResponse>;
}

/// Where a statement executes: a backend pool, or one registered
/// transaction handle.
pub(crate) enum Target {
    Pool(MySqlPool),
    Txn(Arc<TxnHandle>),
}

pub struct SqlRepository {
    pub(crate) backends: Arc<Backends>,
    pub(crate) registry: Arc<TxnRegistry>,
    pub(crate) retry: RetryOptions,
}

impl SqlRepository {
    pub fn new(backends: Arc<Backends>, registry: Arc<TxnRegistry>) -> Self {
        Self {
            backends,
            registry,
            retry: RetryOptions::default(),
        }
    }

    pub fn with_retry_options(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn pool(&self, db_name: &str) -> EngineResult<MySqlPool> {
        if db_name.is_empty() {
            return Err(EngineError::invalid_argument("db_name required"));
        }
        self.backends
            .get(db_name)
            .cloned()
            .ok_or_else(|| EngineError::invalid_argument(format!("unknown database '{db_name}'")))
    }

    /// Resolve the execution target: the named pool, or the registered
    /// transaction when `transaction_id` is non-empty.
    pub(crate) fn target(&self, db_name: &str, transaction_id: &str) -> EngineResult<Target> {
        if !transaction_id.is_empty() {
            let handle = self
                .registry
                .resolve(transaction_id)
                .ok_or_else(|| EngineError::invalid_transaction_id(transaction_id))?;
            return Ok(Target::Txn(handle));
        }
        Ok(Target::Pool(self.pool(db_name)?))
    }

    /// Execute a mutation statement on the target, returning the
    /// affected-row count. Backend errors map to `fail_kind` except for
    /// unique-key collisions on insert, which map to `DUPLICATE`.
    pub(crate) async fn execute_statement(
        &self,
        ctx: &RequestContext,
        target: &Target,
        sql: &str,
        params: &[SqlValue],
        fail_kind: ErrorKind,
    ) -> EngineResult<u64> {
        match target {
            Target::Txn(handle) => {
                let mut guard = handle.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or_else(|| EngineError::invalid_transaction_id("<consumed>"))?;
                let result = build_query(sql, params).execute(&mut **tx).await;
                result
                    .map(|r| r.rows_affected())
                    .map_err(|err| map_backend_error(fail_kind, &err))
            }
            Target::Pool(pool) => {
                let result = with_retry(&self.retry, &ctx.cancel, || {
                    let query = build_query(sql, params);
                    async move { query.execute(pool).await }
                })
                .await;
                result
                    .map(|r| r.rows_affected())
                    .map_err(|err| map_retry_error(fail_kind, err))
            }
        }
    }

    /// Run a SELECT on the target and collect the raw driver rows.
    pub(crate) async fn fetch_rows(
        &self,
        ctx: &RequestContext,
        target: &Target,
        sql: &str,
        params: &[SqlValue],
    ) -> EngineResult<Vec<MySqlRow>> {
        match target {
            Target::Txn(handle) => {
                let mut guard = handle.lock().await;
                let tx = guard
                    .as_mut()
                    .ok_or_else(|| EngineError::invalid_transaction_id("<consumed>"))?;
                build_query(sql, params)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(|err| map_backend_error(ErrorKind::QueryFailed, &err))
            }
            Target::Pool(pool) => with_retry(&self.retry, &ctx.cancel, || {
                let query = build_query(sql, params);
                async move { query.fetch_all(pool).await }
            })
            .await
            .map_err(|err| map_retry_error(ErrorKind::QueryFailed, err)),
        }
    }
}

fn build_query<'q>(sql: &'q str, params: &[SqlValue]) -> Query<'q, MySql, MySqlArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_value(query, param);
    }
    query
}

fn is_duplicate(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.to_string().contains("Duplicate"))
        .unwrap_or(false)
}

fn map_backend_error(fail_kind: ErrorKind, err: &sqlx::Error) -> EngineError {
    if fail_kind == ErrorKind::InsertFailed && is_duplicate(err) {
        return EngineError::new(ErrorKind::Duplicate, err.to_string());
    }
    EngineError::new(fail_kind, err.to_string())
}

fn map_retry_error(fail_kind: ErrorKind, err: RetryError) -> EngineError {
    if fail_kind == ErrorKind::InsertFailed {
        if let Some(source) = err.source_err() {
            if is_duplicate(source) {
                return EngineError::new(ErrorKind::Duplicate, source.to_string());
            }
        }
    }
    EngineError::new(fail_kind, err.to_string())
}

fn require_table(table: &silo_proto::TableRef) -> EngineResult<()> {
    if table.db_name.is_empty() || table.table_name.is_empty() {
        return Err(EngineError::invalid_argument("table required"));
    }
    Ok(())
}

/// Convert one wire row, returning `None` for an empty row.
fn convert_row(row: &Row) -> EngineResult<Option<Vec<(String, SqlValue)>>> {
    if row.is_empty() {
        return Ok(None);
    }
    let mut converted = Vec::with_capacity(row.len());
    for (key, value) in row {
        let sql_value = from_wire(value).map_err(|err| {
            EngineError::invalid_argument(format!(
                "invalid value for field '{key}': {}",
                err.message
            ))
        })?;
        converted.push((key.clone(), sql_value));
    }
    Ok(Some(converted))
}

#[async_trait]
impl Repository for SqlRepository {
    async fn query(&self, ctx: &RequestContext, req: &QueryRequest) -> EngineResult<QueryResponse> {
        require_table(&req.table)?;
        tracing::debug!(
            trace_id = %ctx.trace_id,
            db = %req.table.db_name,
            table = %req.table.table_name,
            "query request"
        );

        let fragment = sqlgen::compose_select(req, false)?;
        let target = self.target(&req.table.db_name, &req.transaction_id)?;

        let rows = self
            .fetch_rows(ctx, &target, &fragment.sql, &fragment.params)
            .await?;
        let rows = rows
            .iter()
            .map(|row| row_to_wire(row, &ctx.trace_id))
            .collect();
        Ok(QueryResponse { rows })
    }

    async fn insert(
        &self,
        ctx: &RequestContext,
        req: &InsertRequest,
    ) -> EngineResult<MutationResponse> {
        require_table(&req.table)?;
        if req.rows.is_empty() {
            return Err(EngineError::invalid_argument("rows cannot be empty"));
        }
        tracing::debug!(
            trace_id = %ctx.trace_id,
            db = %req.table.db_name,
            table = %req.table.table_name,
            rows = req.rows.len(),
            "insert request"
        );

        let mut records = Vec::with_capacity(req.rows.len());
        for (i, row) in req.rows.iter().enumerate() {
            match convert_row(row)? {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(
                        trace_id = %ctx.trace_id,
                        table = %req.table.table_name,
                        row_index = i,
                        "skipping empty row during insert"
                    );
                }
            }
        }
        if records.is_empty() {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                table = %req.table.table_name,
                "no valid rows to insert after processing input"
            );
            return Ok(MutationResponse { affected_rows: 0 });
        }

        // Column list is the sorted union across rows; rows missing a
        // column bind NULL for it.
        let columns: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.iter().map(|(k, _)| k.as_str()))
            .collect();
        let columns: Vec<&str> = columns.into_iter().collect();

        let (verb, suffix) = match req.on_conflict {
            ConflictAction::Fail | ConflictAction::Unspecified => ("INSERT", String::new()),
            ConflictAction::Ignore => ("INSERT IGNORE", String::new()),
            ConflictAction::Upsert => {
                if req.conflict_columns.is_empty() {
                    return Err(EngineError::invalid_argument(
                        "conflict_columns field is required for UPSERT operation",
                    ));
                }
                if req.update_columns.is_empty() {
                    return Err(EngineError::invalid_argument(
                        "update_columns field is required for UPSERT operation",
                    ));
                }
                let assignments = req
                    .update_columns
                    .iter()
                    .map(|c| format!("{0} = VALUES({0})", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                ("INSERT", format!(" ON DUPLICATE KEY UPDATE {assignments}"))
            }
        };

        let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
        let values_list = vec![row_placeholders.as_str(); records.len()].join(", ");
        let sql = format!(
            "{verb} INTO {} ({}) VALUES {}{suffix}",
            quote_ident(&req.table.table_name),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            values_list,
        );

        let mut params = Vec::with_capacity(records.len() * columns.len());
        for record in &records {
            for column in &columns {
                let value = record
                    .iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(SqlValue::Null);
                params.push(value);
            }
        }

        let target = self.target(&req.table.db_name, &req.transaction_id)?;
        let affected_rows = self
            .execute_statement(ctx, &target, &sql, &params, ErrorKind::InsertFailed)
            .await?;
        Ok(MutationResponse { affected_rows })
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        req: &UpdateRequest,
    ) -> EngineResult<MutationResponse> {
        require_table(&req.table)?;
        if req.data.is_empty() {
            return Err(EngineError::invalid_argument("update data cannot be empty"));
        }
        let where_clause = req
            .where_clause
            .as_ref()
            .ok_or_else(|| EngineError::invalid_argument("where clause is required for updates"))?;
        tracing::debug!(
            trace_id = %ctx.trace_id,
            db = %req.table.db_name,
            table = %req.table.table_name,
            transaction_id = %req.transaction_id,
            "update request"
        );

        let record = convert_row(&req.data)?.unwrap_or_default();
        if record.is_empty() {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                "no valid update data provided after conversion"
            );
            return Ok(MutationResponse { affected_rows: 0 });
        }

        // The where fragment is validated before any backend is
        // touched; an unqualified UPDATE is never issued.
        let fragment = sqlgen::build_where(where_clause)
            .map_err(|err| err.with_kind(ErrorKind::InvalidWhereClause))?;
        if fragment.is_empty() {
            return Err(EngineError::new(
                ErrorKind::InvalidWhereClause,
                "effective WHERE clause is empty",
            ));
        }

        let assignments = record
            .iter()
            .map(|(k, _)| format!("{} = ?", quote_ident(k)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_ident(&req.table.table_name),
            assignments,
            fragment.sql,
        );
        let mut params: Vec<SqlValue> = record.into_iter().map(|(_, v)| v).collect();
        params.extend(fragment.params);

        let target = self.target(&req.table.db_name, &req.transaction_id)?;
        let affected_rows = self
            .execute_statement(ctx, &target, &sql, &params, ErrorKind::UpdateFailed)
            .await?;
        Ok(MutationResponse { affected_rows })
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        req: &DeleteRequest,
    ) -> EngineResult<MutationResponse> {
        require_table(&req.table)?;
        let where_clause = req
            .where_clause
            .as_ref()
            .ok_or_else(|| EngineError::invalid_argument("where clause is required for delete"))?;
        tracing::debug!(
            trace_id = %ctx.trace_id,
            db = %req.table.db_name,
            table = %req.table.table_name,
            transaction_id = %req.transaction_id,
            "delete request"
        );

        let fragment = sqlgen::build_where(where_clause)
            .map_err(|err| err.with_kind(ErrorKind::InvalidWhereClause))?;
        if fragment.is_empty() {
            tracing::error!(
                trace_id = %ctx.trace_id,
                table = %req.table.table_name,
                "delete aborted: effective WHERE clause is empty"
            );
            return Err(EngineError::new(
                ErrorKind::InvalidWhereClause,
                "effective WHERE clause is empty",
            ));
        }

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&req.table.table_name),
            fragment.sql,
        );

        let target = self.target(&req.table.db_name, &req.transaction_id)?;
        let affected_rows = self
            .execute_statement(ctx, &target, &sql, &fragment.params, ErrorKind::DeleteFailed)
            .await?;
        Ok(MutationResponse { affected_rows })
    }

    async fn begin_transaction(
        &self,
        ctx: &RequestContext,
        req: &BeginTransactionRequest,
    ) -> EngineResult<BeginTransactionResponse> {
        let pool = self.pool(&req.db_name)?;
        let tx = pool.begin().await.map_err(|err| {
            EngineError::new(
                ErrorKind::TransactionError,
                format!("failed to begin transaction: {err}"),
            )
        })?;

        let transaction_id = self
            .registry
            .insert_new(TxnHandle::new(req.db_name.clone(), tx));
        tracing::info!(
            trace_id = %ctx.trace_id,
            transaction_id = %transaction_id,
            db = %req.db_name,
            "started new transaction"
        );
        Ok(BeginTransactionResponse { transaction_id })
    }

    async fn commit_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()> {
        if req.transaction_id.is_empty() {
            return Err(EngineError::invalid_argument("transaction_id is required"));
        }

        let handle = self
            .registry
            .resolve(&req.transaction_id)
            .ok_or_else(|| EngineError::invalid_transaction_id(&req.transaction_id))?;

        let tx = handle.lock().await.take();
        let result = match tx {
            Some(tx) => tx.commit().await.map_err(|err| {
                EngineError::new(
                    ErrorKind::TransactionCommitFailed,
                    format!("failed to commit transaction {}: {err}", req.transaction_id),
                )
            }),
            None => Err(EngineError::invalid_transaction_id(&req.transaction_id)),
        };
        // The entry is removed whether or not the backend call
        // succeeded; the handle is spent either way.
        self.registry.remove(&req.transaction_id);

        if result.is_ok() {
            tracing::info!(
                trace_id = %ctx.trace_id,
                transaction_id = %req.transaction_id,
                "transaction committed"
            );
        }
        result
    }

    async fn rollback_transaction(
        &self,
        ctx: &RequestContext,
        req: &TransactionRequest,
    ) -> EngineResult<()> {
        if req.transaction_id.is_empty() {
            return Err(EngineError::invalid_argument("transaction_id is required"));
        }

        let Some(handle) = self.registry.resolve(&req.transaction_id) else {
            // Unknown ids roll back successfully; see the trait docs.
            tracing::warn!(
                trace_id = %ctx.trace_id,
                transaction_id = %req.transaction_id,
                "rollback of unknown transaction, treating as already rolled back"
            );
            return Ok(());
        };

        let tx = handle.lock().await.take();
        let result = match tx {
            Some(tx) => tx.rollback().await.map_err(|err| {
                EngineError::new(
                    ErrorKind::TransactionRollbackFailed,
                    format!(
                        "failed to rollback transaction {}: {err}",
                        req.transaction_id
                    ),
                )
            }),
            None => Ok(()),
        };
        self.registry.remove(&req.transaction_id);
        result
    }

    async fn list_tables(
        &self,
        ctx: &RequestContext,
        req: &ListTablesRequest,
    ) -> EngineResult<ListTablesResponse> {
        self.do_list_tables(ctx, req).await
    }

    async fn describe_table(
        &self,
        ctx: &RequestContext,
        req: &DescribeTableRequest,
    ) -> EngineResult<DescribeTableResponse> {
        self.do_describe_table(ctx, req).await
    }

    async fn exec_raw_sql(
        &self,
        ctx: &RequestContext,
        req: &ExecRawSqlRequest,
    ) -> EngineResult<ExecRawSqlResponse> {
        if req.db.is_empty() {
            return Err(EngineError::invalid_argument("db required"));
        }
        if req.sql.is_empty() {
            return Err(EngineError::invalid_argument("sql required"));
        }
        tracing::debug!(
            trace_id = %ctx.trace_id,
            db = %req.db,
            transaction_id = %req.transaction_id,
            "raw sql request"
        );

        let target = self.target(&req.db, &req.transaction_id)?;
        let affected_rows = self
            .execute_statement(ctx, &target, &req.sql, &[], ErrorKind::ExecRawSqlFailed)
            .await?;
        Ok(ExecRawSqlResponse { affected_rows })
    }
}
