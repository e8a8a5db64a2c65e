//! Wire-level request and response model shared by the Silo gateway and
//! its clients.
//!
//! Requests describe a table, a recursive where-clause tree, optional
//! joins, aggregations, grouping and pagination. The gateway translates
//! them into parameterized SQL; nothing in this crate touches a driver.
//! Dynamic values travel as plain JSON values: null, number, string,
//! bool, or a list of the same. Structured objects are not valid
//! operand or row values and are rejected by the engine's value bridge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod codec;

/// A dynamic wire value.
pub type Value = serde_json::Value;

/// A single result (or insert) row: column name to dynamic value.
///
/// Ordered by column name so that serialized rows are deterministic.
pub type Row = BTreeMap<String, Value>;

/// Identifies a logical backend plus a physical table on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub db_name: String,
    pub table_name: String,
}

impl TableRef {
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            table_name: table_name.into(),
        }
    }
}

/// Comparison operators accepted in where/having conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
    Exists,
    NotExists,
}

/// Connective for a nested clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

/// A recursive where/having tree: either a single condition or a
/// nested group of clauses joined by one logical operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhereClause {
    Condition(Condition),
    Nested(NestedClause),
}

/// One `field <operator> operand` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    /// Absent for the unary operators (`IS NULL`, `IS NOT NULL`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<Operand>,
}

/// The right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A literal dynamic value (scalar, or a list for `IN`/`NOT IN`).
    Literal(Value),
    /// Reserved for `EXISTS`/`NOT EXISTS`; the builders reject it.
    Subquery(Box<QueryRequest>),
}

/// An ordered group of sub-clauses combined with `AND` or `OR`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedClause {
    pub logical_operator: LogicalOperator,
    pub clauses: Vec<WhereClause>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    /// Treated as `INNER`.
    #[default]
    Unspecified,
    Inner,
    Left,
    Right,
}

/// One equality pairing between the primary table and the joined table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub primary_field: String,
    pub joined_field: String,
    /// Only `EQ` (or absent, meaning `EQ`) is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub target_table: String,
    #[serde(default, rename = "type")]
    pub join_type: JoinType,
    pub on_conditions: Vec<JoinOn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// `FUNC(field) AS alias`. `field` may be empty only for `COUNT`,
/// which then counts `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregationFunction,
    #[serde(default)]
    pub field: String,
    pub alias: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// How insert collisions on unique keys are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictAction {
    /// Treated as `FAIL`.
    #[default]
    Unspecified,
    Fail,
    Ignore,
    Upsert,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub table: TableRef,
    #[serde(default)]
    pub select_fields: Vec<String>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having_clause: Option<WhereClause>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Empty means "not inside a transaction".
    #[serde(default)]
    pub transaction_id: String,
    /// Field used to form point-read cache keys; empty disables caching.
    #[serde(default)]
    pub cache_by_field: String,
    /// Logical cache database tag; zero disables caching.
    #[serde(default)]
    pub redis_db: u32,
    /// Override for the cache entry TTL; zero means the default.
    #[serde(default)]
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub table: TableRef,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub on_conflict: ConflictAction,
    /// Required for `UPSERT`.
    #[serde(default)]
    pub conflict_columns: Vec<String>,
    /// Columns rewritten on collision; required for `UPSERT`.
    #[serde(default)]
    pub update_columns: Vec<String>,
    #[serde(default)]
    pub transaction_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub table: TableRef,
    pub data: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub cache_by_field: String,
    #[serde(default)]
    pub redis_db: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub table: TableRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub cache_by_field: String,
    #[serde(default)]
    pub redis_db: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub affected_rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeginTransactionRequest {
    pub db_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTablesRequest {
    pub db_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTablesResponse {
    pub table_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribeTableRequest {
    pub table: TableRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_unique: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribeTableResponse {
    pub table_name: String,
    pub columns: Vec<ColumnMetadata>,
    pub indices: Vec<IndexMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecRawSqlRequest {
    pub db: String,
    pub sql: String,
    #[serde(default)]
    pub transaction_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRawSqlResponse {
    pub affected_rows: u64,
}

/// Closed set of wire error codes.
///
/// Every error the gateway returns carries one of these, so clients can
/// branch on the code without parsing messages.
pub mod code {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const INVALID_JOIN: &str = "INVALID_JOIN";
    pub const INVALID_AGGREGATION: &str = "INVALID_AGGREGATION";
    pub const INVALID_WHERE_CLAUSE: &str = "INVALID_WHERE_CLAUSE";
    pub const INVALID_HAVING_CLAUSE: &str = "INVALID_HAVING_CLAUSE";

    pub const QUERY_FAILED: &str = "QUERY_FAILED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INSERT_FAILED: &str = "INSERT_FAILED";
    pub const DUPLICATE: &str = "DUPLICATE";
    pub const UPDATE_FAILED: &str = "UPDATE_FAILED";
    pub const DELETE_FAILED: &str = "DELETE_FAILED";

    pub const TRANSACTION_ERROR: &str = "TRANSACTION_ERROR";
    pub const TRANSACTION_COMMIT_FAILED: &str = "TRANSACTION_COMMIT_FAILED";
    pub const TRANSACTION_ROLLBACK_FAILED: &str = "TRANSACTION_ROLLBACK_FAILED";
    pub const INVALID_TRANSACTION_ID: &str = "INVALID_TRANSACTION_ID";

    pub const LIST_TABLES_FAILED: &str = "LIST_TABLES_FAILED";
    pub const DESCRIBE_TABLE_FAILED: &str = "DESCRIBE_TABLE_FAILED";

    pub const EXEC_RAW_SQL_FAILED: &str = "EXEC_RAW_SQL_FAILED";

    /// Transport-level code: the per-request deadline elapsed before the
    /// engine produced a response.
    pub const DEADLINE_EXCEEDED: &str = "DEADLINE_EXCEEDED";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_clause_tagging_round_trips() {
        let clause = WhereClause::Nested(NestedClause {
            logical_operator: LogicalOperator::And,
            clauses: vec![
                WhereClause::Condition(Condition {
                    field: "id".into(),
                    operator: Operator::In,
                    operand: Some(Operand::Literal(json!([1, 2, 3]))),
                }),
                WhereClause::Condition(Condition {
                    field: "deleted_at".into(),
                    operator: Operator::IsNull,
                    operand: None,
                }),
            ],
        });

        let encoded = serde_json::to_value(&clause).expect("encode where clause");
        assert_eq!(
            encoded["nested"]["clauses"][0]["condition"]["operator"],
            json!("IN")
        );
        assert_eq!(
            encoded["nested"]["clauses"][1]["condition"]["operator"],
            json!("IS_NULL")
        );

        let decoded: WhereClause =
            serde_json::from_value(encoded).expect("decode where clause");
        assert_eq!(decoded, clause);
    }

    #[test]
    fn query_request_defaults_fill_optional_fields() {
        let req: QueryRequest = serde_json::from_value(json!({
            "table": { "db_name": "primary", "table_name": "users" }
        }))
        .expect("minimal query request should deserialize");

        assert!(req.select_fields.is_empty());
        assert!(req.where_clause.is_none());
        assert_eq!(req.transaction_id, "");
        assert_eq!(req.redis_db, 0);
        assert_eq!(req.limit, None);
    }

    #[test]
    fn join_type_defaults_to_unspecified() {
        let join: Join = serde_json::from_value(json!({
            "target_table": "orders",
            "on_conditions": [
                { "primary_field": "id", "joined_field": "user_id" }
            ]
        }))
        .expect("join without type should deserialize");
        assert_eq!(join.join_type, JoinType::Unspecified);
        assert_eq!(join.on_conditions[0].operator, None);
    }
}
