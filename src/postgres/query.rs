use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::UnitOfWorkError;
use crate::value::{Row, Value};

/// Convert a single `tokio_postgres` row into a middleware row.
///
/// # Errors
/// Returns an error if a column cannot be retrieved.
pub(crate) fn row_from_postgres(row: &tokio_postgres::Row) -> Result<Row, UnitOfWorkError> {
    let column_names = Arc::new(
        row.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect::<Vec<_>>(),
    );
    build_row(row, &column_names)
}

/// Convert a batch of rows, sharing one column-name allocation.
///
/// # Errors
/// Returns an error if any column cannot be retrieved.
pub(crate) fn rows_from_postgres(
    rows: &[tokio_postgres::Row],
) -> Result<Vec<Row>, UnitOfWorkError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let column_names = Arc::new(
        first
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect::<Vec<_>>(),
    );

    rows.iter().map(|row| build_row(row, &column_names)).collect()
}

fn build_row(
    row: &tokio_postgres::Row,
    column_names: &Arc<Vec<String>>,
) -> Result<Row, UnitOfWorkError> {
    let mut values = Vec::with_capacity(column_names.len());
    for idx in 0..column_names.len() {
        values.push(extract_value(row, idx)?);
    }
    Ok(Row::new(Arc::clone(column_names), values))
}

// Match on the column's Postgres type name and extract accordingly; unknown
// types fall back to text.
fn extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value, UnitOfWorkError> {
    let type_info = row.columns()[idx].type_();

    match type_info.name() {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, |v| Value::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, |v| Value::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Int))
        }
        "float4" | "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Float))
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Bool))
        }
        "timestamp" | "timestamptz" => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Timestamp))
        }
        "json" | "jsonb" => {
            let val: Option<JsonValue> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Json))
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Blob))
        }
        _ => {
            let val: Option<String> = row.try_get(idx)?;
            Ok(val.map_or(Value::Null, Value::Text))
        }
    }
}
