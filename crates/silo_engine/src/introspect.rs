//! Schema introspection over the driver's metadata views.
//!
//! Optional column attributes are populated only when the backend
//! supplies them; a decode mismatch on an optional attribute leaves it
//! unset rather than failing the call.

use silo_proto::{
    ColumnMetadata, DescribeTableRequest, DescribeTableResponse, IndexMetadata, ListTablesRequest,
    ListTablesResponse,
};
use sqlx::Row as _;

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::repo::{SqlRepository, Target};
use crate::value::SqlValue;
use crate::RequestContext;

const LIST_TABLES_SQL: &str = "SELECT table_name AS name \
     FROM information_schema.tables \
     WHERE table_schema = DATABASE() \
     ORDER BY table_name";

const TABLE_EXISTS_SQL: &str = "SELECT COUNT(*) AS cnt \
     FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_name = ?";

const COLUMNS_SQL: &str = "SELECT column_name AS name, \
            data_type AS data_type, \
            is_nullable AS is_nullable, \
            column_default AS default_value, \
            column_key AS column_key, \
            character_maximum_length AS max_length \
     FROM information_schema.columns \
     WHERE table_schema = DATABASE() AND table_name = ? \
     ORDER BY ordinal_position";

const INDICES_SQL: &str = "SELECT index_name AS name, \
            column_name AS column_name, \
            non_unique AS non_unique \
     FROM information_schema.statistics \
     WHERE table_schema = DATABASE() AND table_name = ? \
     ORDER BY index_name, seq_in_index";

impl SqlRepository {
    pub(crate) async fn do_list_tables(
        &self,
        ctx: &RequestContext,
        req: &ListTablesRequest,
    ) -> EngineResult<ListTablesResponse> {
        let target = Target::Pool(self.pool(&req.db_name)?);
        let rows = self
            .fetch_rows(ctx, &target, LIST_TABLES_SQL, &[])
            .await
            .map_err(|err| EngineError::new(ErrorKind::ListTablesFailed, err.message))?;

        let mut table_names = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|err| EngineError::new(ErrorKind::ListTablesFailed, err.to_string()))?;
            table_names.push(name);
        }
        Ok(ListTablesResponse { table_names })
    }

    pub(crate) async fn do_describe_table(
        &self,
        ctx: &RequestContext,
        req: &DescribeTableRequest,
    ) -> EngineResult<DescribeTableResponse> {
        if req.table.db_name.is_empty() || req.table.table_name.is_empty() {
            return Err(EngineError::invalid_argument("table required"));
        }
        let target = Target::Pool(self.pool(&req.table.db_name)?);
        let table_param = [SqlValue::Text(req.table.table_name.clone())];

        let exists = self
            .fetch_rows(ctx, &target, TABLE_EXISTS_SQL, &table_param)
            .await
            .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.message))?;
        let count: i64 = exists
            .first()
            .and_then(|row| row.try_get("cnt").ok())
            .unwrap_or(0);
        if count == 0 {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                table = %req.table.table_name,
                "table not found"
            );
            return Err(EngineError::new(
                ErrorKind::NotFound,
                format!("table '{}' not found", req.table.table_name),
            ));
        }

        let mut response = DescribeTableResponse {
            table_name: req.table.table_name.clone(),
            columns: Vec::new(),
            indices: Vec::new(),
        };

        let column_rows = self
            .fetch_rows(ctx, &target, COLUMNS_SQL, &table_param)
            .await
            .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.message))?;
        for row in &column_rows {
            let name: String = row
                .try_get("name")
                .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.to_string()))?;
            let data_type: String = row
                .try_get("data_type")
                .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.to_string()))?;

            let is_nullable = row
                .try_get::<String, _>("is_nullable")
                .ok()
                .map(|v| v.eq_ignore_ascii_case("YES"));
            let default_value = row.try_get::<Option<String>, _>("default_value").ok().flatten();
            let is_primary_key = row
                .try_get::<String, _>("column_key")
                .ok()
                .map(|v| v == "PRI");
            let max_length = row
                .try_get::<Option<i64>, _>("max_length")
                .ok()
                .flatten()
                .or_else(|| {
                    row.try_get::<Option<u64>, _>("max_length")
                        .ok()
                        .flatten()
                        .map(|v| v.min(i64::MAX as u64) as i64)
                });

            response.columns.push(ColumnMetadata {
                name,
                data_type,
                is_nullable,
                default_value,
                is_primary_key,
                max_length,
            });
        }

        let index_rows = self
            .fetch_rows(ctx, &target, INDICES_SQL, &table_param)
            .await
            .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.message))?;
        for row in &index_rows {
            let name: String = row
                .try_get("name")
                .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.to_string()))?;
            let column: String = row
                .try_get("column_name")
                .map_err(|err| EngineError::new(ErrorKind::DescribeTableFailed, err.to_string()))?;
            let is_unique = row
                .try_get::<i64, _>("non_unique")
                .ok()
                .map(|non_unique| non_unique == 0);

            // Multi-column indices arrive as one row per column, in
            // key order.
            match response.indices.last_mut() {
                Some(last) if last.name == name => last.columns.push(column),
                _ => response.indices.push(IndexMetadata {
                    name,
                    columns: vec![column],
                    is_unique,
                }),
            }
        }

        Ok(response)
    }
}
