//! SQL fragment builders.
//!
//! Every builder is pure: it returns a `(fragment, parameters)` pair
//! and never touches a driver. Precedence inside where/having trees is
//! preserved by parenthesizing every non-empty child fragment before
//! joining with the group's logical operator.

use silo_proto::{
    Aggregation, AggregationFunction, GroupBy, Join, JoinType, NestedClause, Operand, Operator,
    OrderBy, QueryRequest, SortDirection, WhereClause,
};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::value::{from_wire, SqlValue};

/// A partial SQL string plus its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Fragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Operator metadata: the SQL spelling and whether an operand is
/// required. All fourteen operators are covered; the enum is closed.
fn operator_sql(op: Operator) -> (&'static str, bool) {
    match op {
        Operator::Eq => ("=", true),
        Operator::Neq => ("!=", true),
        Operator::Gt => (">", true),
        Operator::Gte => (">=", true),
        Operator::Lt => ("<", true),
        Operator::Lte => ("<=", true),
        Operator::In => ("IN", true),
        Operator::NotIn => ("NOT IN", true),
        Operator::Like => ("LIKE", true),
        Operator::NotLike => ("NOT LIKE", true),
        Operator::IsNull => ("IS NULL", false),
        Operator::IsNotNull => ("IS NOT NULL", false),
        Operator::Exists => ("EXISTS", true),
        Operator::NotExists => ("NOT EXISTS", true),
    }
}

/// Back-tick quote an identifier, stripping any embedded back-ticks.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', ""))
}

/// Recursively build a where/having tree into one fragment.
///
/// An absent clause or a nested group with no non-empty children
/// yields an empty fragment; the caller decides whether that is
/// acceptable for the operation at hand.
pub fn build_where(clause: &WhereClause) -> EngineResult<Fragment> {
    match clause {
        WhereClause::Condition(cond) => {
            if cond.field.is_empty() {
                return Err(EngineError::invalid_argument("condition field is required"));
            }
            let (op_sql, requires_value) = operator_sql(cond.operator);

            if !requires_value {
                return Ok(Fragment {
                    sql: format!("{} {}", cond.field, op_sql),
                    params: Vec::new(),
                });
            }

            if matches!(cond.operator, Operator::Exists | Operator::NotExists) {
                return Err(EngineError::invalid_argument(format!(
                    "{op_sql} reserves a subquery operand, which is not supported"
                )));
            }

            let value = match &cond.operand {
                Some(Operand::Literal(v)) => from_wire(v).map_err(|err| {
                    EngineError::invalid_argument(format!(
                        "invalid literal value for field '{}': {}",
                        cond.field, err.message
                    ))
                })?,
                Some(Operand::Subquery(_)) => {
                    return Err(EngineError::invalid_argument(format!(
                        "subquery operand for field '{}' is not supported",
                        cond.field
                    )))
                }
                None => {
                    return Err(EngineError::invalid_argument(format!(
                        "condition for field '{}' requires a value",
                        cond.field
                    )))
                }
            };

            if matches!(cond.operator, Operator::In | Operator::NotIn) {
                return build_in_condition(&cond.field, cond.operator, op_sql, value);
            }

            if value.is_list() {
                return Err(EngineError::invalid_argument(format!(
                    "literal value for {op_sql} operator must be a scalar, got a list for field '{}'",
                    cond.field
                )));
            }

            Ok(Fragment {
                sql: format!("{} {} ?", cond.field, op_sql),
                params: vec![value],
            })
        }
        WhereClause::Nested(nested) => build_nested(nested),
    }
}

fn build_in_condition(
    field: &str,
    operator: Operator,
    op_sql: &str,
    value: SqlValue,
) -> EngineResult<Fragment> {
    let elements = match value {
        SqlValue::List(elements) => elements,
        other => {
            return Err(EngineError::invalid_argument(format!(
                "literal value for {op_sql} operator must be a list, got {} for field '{field}'",
                other.type_name()
            )))
        }
    };

    // IN () is always false, NOT IN () always true; the constant keeps
    // the driver from ever seeing an empty list.
    if elements.is_empty() {
        let sql = if operator == Operator::In { "1=0" } else { "1=1" };
        return Ok(Fragment {
            sql: sql.to_string(),
            params: Vec::new(),
        });
    }

    for element in &elements {
        if element.is_list() {
            return Err(EngineError::invalid_argument(format!(
                "{op_sql} list elements for field '{field}' must be scalars"
            )));
        }
    }

    let placeholders = vec!["?"; elements.len()].join(", ");
    Ok(Fragment {
        sql: format!("{field} {op_sql} ({placeholders})"),
        params: elements,
    })
}

fn build_nested(nested: &NestedClause) -> EngineResult<Fragment> {
    if nested.clauses.is_empty() {
        return Ok(Fragment::empty());
    }

    let connective = match nested.logical_operator {
        silo_proto::LogicalOperator::And => " AND ",
        silo_proto::LogicalOperator::Or => " OR ",
    };

    let mut sub_exprs = Vec::with_capacity(nested.clauses.len());
    let mut params = Vec::new();
    for (i, sub_clause) in nested.clauses.iter().enumerate() {
        let child = build_where(sub_clause).map_err(|err| {
            EngineError::new(err.kind, format!("error in nested clause element {i}: {}", err.message))
        })?;
        if !child.is_empty() {
            sub_exprs.push(format!("({})", child.sql));
            params.extend(child.params);
        }
    }

    if sub_exprs.is_empty() {
        return Ok(Fragment::empty());
    }

    Ok(Fragment {
        sql: sub_exprs.join(connective),
        params,
    })
}

/// Build one join clause: `<TYPE> <table> ON <cond> AND <cond> …`.
///
/// Only equality is accepted in ON conditions; both sides are fully
/// table-qualified and back-tick quoted.
pub fn build_join(primary_table: &str, join: &Join) -> EngineResult<String> {
    if join.target_table.is_empty() {
        return Err(EngineError::new(
            ErrorKind::InvalidJoin,
            "join target_table is required",
        ));
    }
    if join.on_conditions.is_empty() {
        return Err(EngineError::new(
            ErrorKind::InvalidJoin,
            "join on_conditions are required",
        ));
    }

    let join_type = match join.join_type {
        JoinType::Inner | JoinType::Unspecified => "INNER JOIN",
        JoinType::Left => "LEFT JOIN",
        JoinType::Right => "RIGHT JOIN",
    };

    let mut on_parts = Vec::with_capacity(join.on_conditions.len());
    for cond in &join.on_conditions {
        if cond.primary_field.is_empty() || cond.joined_field.is_empty() {
            return Err(EngineError::new(
                ErrorKind::InvalidJoin,
                "join condition fields cannot be empty",
            ));
        }
        if let Some(op) = cond.operator {
            if op != Operator::Eq {
                return Err(EngineError::new(
                    ErrorKind::InvalidJoin,
                    format!("only EQ is supported in JOIN ON conditions, got {op:?}"),
                ));
            }
        }
        on_parts.push(format!(
            "{}.{} = {}.{}",
            quote_ident(primary_table),
            quote_ident(&cond.primary_field),
            quote_ident(&join.target_table),
            quote_ident(&cond.joined_field),
        ));
    }

    Ok(format!(
        "{} {} ON {}",
        join_type,
        join.target_table,
        on_parts.join(" AND ")
    ))
}

/// Build one aggregation select item: `FUNC(field) AS alias`.
pub fn build_aggregation(agg: &Aggregation) -> EngineResult<String> {
    if agg.alias.is_empty() {
        return Err(EngineError::new(
            ErrorKind::InvalidAggregation,
            "aggregation alias is required",
        ));
    }

    let func = match agg.function {
        AggregationFunction::Count => "COUNT",
        AggregationFunction::Sum => "SUM",
        AggregationFunction::Avg => "AVG",
        AggregationFunction::Min => "MIN",
        AggregationFunction::Max => "MAX",
    };

    let field = if agg.field.is_empty() {
        if agg.function != AggregationFunction::Count {
            return Err(EngineError::new(
                ErrorKind::InvalidAggregation,
                format!("field is required for aggregation function {func}"),
            ));
        }
        "*".to_string()
    } else if agg.field == "*" {
        agg.field.clone()
    } else {
        quote_ident(&agg.field)
    };

    Ok(format!("{}({}) AS {}", func, field, quote_ident(&agg.alias)))
}

/// Build a group-by column list (no keyword).
pub fn build_group_by(group_by: &GroupBy) -> String {
    group_by
        .fields
        .iter()
        .map(|f| quote_ident(f))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_order_by(terms: &[OrderBy]) -> String {
    terms
        .iter()
        .map(|t| {
            let dir = match t.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {}", quote_ident(&t.field), dir)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compose a full SELECT for a request.
///
/// Composition order matches logical SQL order: select list, joins,
/// where, group by, having, order by, limit/offset. When `subquery` is
/// set an empty select list is an error; a top-level query falls back
/// to `*`.
pub fn compose_select(req: &QueryRequest, subquery: bool) -> EngineResult<Fragment> {
    if req.table.table_name.is_empty() {
        return Err(EngineError::invalid_argument("table and table_name required"));
    }

    let mut select_items = Vec::with_capacity(req.select_fields.len() + req.aggregations.len());
    for field in &req.select_fields {
        if field.is_empty() {
            return Err(EngineError::invalid_argument("select field cannot be empty"));
        }
        select_items.push(if field == "*" {
            field.clone()
        } else {
            quote_ident(field)
        });
    }
    for agg in &req.aggregations {
        select_items.push(build_aggregation(agg)?);
    }

    let select_list = if select_items.is_empty() {
        if subquery {
            return Err(EngineError::invalid_argument(
                "subquery must have select_fields or aggregations defined",
            ));
        }
        "*".to_string()
    } else {
        select_items.join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list,
        quote_ident(&req.table.table_name)
    );
    let mut params = Vec::new();

    for join in &req.joins {
        sql.push(' ');
        sql.push_str(&build_join(&req.table.table_name, join)?);
    }

    if let Some(where_clause) = &req.where_clause {
        let fragment = build_where(where_clause)?;
        if !fragment.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment.sql);
            params.extend(fragment.params);
        }
    }

    if let Some(group_by) = &req.group_by {
        if !group_by.fields.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&build_group_by(group_by));
        }
    }

    if let Some(having) = &req.having_clause {
        let fragment =
            build_where(having).map_err(|err| err.with_kind(ErrorKind::InvalidHavingClause))?;
        if !fragment.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&fragment.sql);
            params.extend(fragment.params);
        }
    }

    if !req.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&build_order_by(&req.order_by));
    }

    match (req.limit, req.offset) {
        (Some(limit), offset) => {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
        (None, Some(offset)) => {
            // MySQL has no bare OFFSET; the documented spelling is an
            // unbounded LIMIT in front of it.
            sql.push_str(&format!(" LIMIT {} OFFSET {offset}", u64::MAX));
        }
        (None, None) => {}
    }

    Ok(Fragment { sql, params })
}
