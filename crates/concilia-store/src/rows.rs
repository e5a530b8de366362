//! Dynamic row ↔ JSON conversion.
//!
//! Base and result tables have schemas discovered at runtime, so rows travel
//! as `serde_json::Map` keyed by column name. Conversion inspects the SQLite
//! storage class of each cell.

use serde_json::{Map, Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::Result;

/// Convert a dynamically-selected row into a JSON map.
pub fn row_to_map(row: &SqliteRow) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::Number(row.try_get::<i64, _>(idx)?.into()),
                "REAL" => Number::from_f64(row.try_get::<f64, _>(idx)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::Null,
                _ => Value::String(row.try_get::<String, _>(idx)?),
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

/// Numeric view of a cell. Unparseable text coerces to zero; amounts missing
/// after null normalization cannot occur, so zero is the safe fallback.
pub fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// String view of a cell for composite-key construction.
///
/// Integral REAL values render without a fractional part so a TEXT `"100"`
/// on one base joins a numeric `100.0` on the other.
pub fn value_to_key_string(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Underscore-joined composite key value for one row.
pub fn composite_key(row: &Map<String, Value>, columns: &[String]) -> String {
    columns
        .iter()
        .map(|col| value_to_key_string(row.get(col).unwrap_or(&Value::Null)))
        .collect::<Vec<_>>()
        .join("_")
}
