//! Value bridge between wire-level dynamic values and driver bind
//! parameters / result columns.
//!
//! Wire → driver: null, number (64-bit float), string, bool and lists
//! of the same convert; structured objects are rejected. Driver → wire:
//! scalar columns map back to their wire counterparts, and wall-clock
//! timestamps render as `YYYY-MM-DD HH:MM:SS`. A column that fails to
//! convert is logged and dropped from the emitted row rather than
//! failing the request.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use silo_proto::{Row, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::error::{EngineError, EngineResult};

/// A converted bind value. Lists only appear transiently inside the
/// fragment builders, which flatten them before anything is bound.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_list(&self) -> bool {
        matches!(self, SqlValue::List(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Number(_) => "number",
            SqlValue::Text(_) => "string",
            SqlValue::Bool(_) => "bool",
            SqlValue::List(_) => "list",
        }
    }
}

/// Convert a wire value into a bind value. Recursive for lists;
/// structured objects are a user error.
pub fn from_wire(value: &Value) -> EngineResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(SqlValue::Number)
            .ok_or_else(|| EngineError::invalid_argument(format!("non-finite number: {n}"))),
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(items) => {
            let mut converted = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let element = from_wire(item).map_err(|err| {
                    EngineError::invalid_argument(format!(
                        "error converting list element {i}: {}",
                        err.message
                    ))
                })?;
                converted.push(element);
            }
            Ok(SqlValue::List(converted))
        }
        Value::Object(_) => Err(EngineError::invalid_argument(
            "struct values are not supported as bind parameters",
        )),
    }
}

/// Attach one scalar bind value to a query.
pub fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Number(n) => query.bind(*n),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Bool(b) => query.bind(*b),
        // Lists are flattened by the fragment builders; a list reaching
        // this point would bind NULL, which the builders never produce.
        SqlValue::List(_) => query.bind(Option::<String>::None),
    }
}

/// Render a timestamp in the gateway's fixed wire format.
pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Materialize one driver row as a wire row. Columns that fail to
/// convert are logged and dropped.
pub fn row_to_wire(row: &MySqlRow, trace_id: &str) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name().to_string();
        match column_to_wire(row, idx, &type_name) {
            Ok(value) => {
                out.insert(name.to_string(), value);
            }
            Err(err) => {
                tracing::error!(
                    trace_id,
                    column = name,
                    column_type = %type_name,
                    error = %err,
                    "failed to convert column value, dropping field"
                );
            }
        }
    }
    out
}

fn column_to_wire(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::from(row.try_get::<i64, _>(idx)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Value::from(row.try_get::<u64, _>(idx)?),
        "YEAR" => Value::from(u64::from(row.try_get::<u16, _>(idx)?)),
        "FLOAT" => float_value(f64::from(row.try_get::<f32, _>(idx)?))?,
        "DOUBLE" => float_value(row.try_get::<f64, _>(idx)?)?,
        "DECIMAL" => {
            // No arbitrary-precision type on the wire; fall back to the
            // driver's text rendering when it will not fit a double.
            match row.try_get::<f64, _>(idx) {
                Ok(v) => float_value(v)?,
                Err(_) => Value::String(row.try_get::<String, _>(idx)?),
            }
        }
        "DATETIME" => Value::String(format_datetime(&row.try_get::<NaiveDateTime, _>(idx)?)),
        "TIMESTAMP" => Value::String(format_datetime(
            &row.try_get::<DateTime<Utc>, _>(idx)?.naive_utc(),
        )),
        "DATE" => Value::String(
            row.try_get::<NaiveDate, _>(idx)?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        "TIME" => Value::String(
            row.try_get::<NaiveTime, _>(idx)?
                .format("%H:%M:%S")
                .to_string(),
        ),
        "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET"
        | "JSON" => Value::String(row.try_get::<String, _>(idx)?),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(idx)?;
            match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(err) => {
                    return Err(sqlx::Error::Decode(
                        format!("binary column is not valid UTF-8: {err}").into(),
                    ))
                }
            }
        }
        _ => Value::String(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

fn float_value(v: f64) -> Result<Value, sqlx::Error> {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| sqlx::Error::Decode(format!("non-finite float value: {v}").into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_convert() {
        assert_eq!(from_wire(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(from_wire(&json!(true)).unwrap(), SqlValue::Bool(true));
        assert_eq!(from_wire(&json!(42)).unwrap(), SqlValue::Number(42.0));
        assert_eq!(
            from_wire(&json!("abc")).unwrap(),
            SqlValue::Text("abc".into())
        );
    }

    #[test]
    fn lists_convert_recursively() {
        let value = from_wire(&json!([1, "two", null])).unwrap();
        assert_eq!(
            value,
            SqlValue::List(vec![
                SqlValue::Number(1.0),
                SqlValue::Text("two".into()),
                SqlValue::Null,
            ])
        );
    }

    #[test]
    fn objects_are_rejected() {
        let err = from_wire(&json!({ "nested": 1 })).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn object_inside_list_names_the_element() {
        let err = from_wire(&json!([1, { "bad": true }])).unwrap_err();
        assert!(
            err.message.contains("list element 1"),
            "message should name the offending element: {}",
            err.message
        );
    }

    #[test]
    fn datetime_uses_fixed_format() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(format_datetime(&dt), "2024-03-07 09:05:01");
    }
}
