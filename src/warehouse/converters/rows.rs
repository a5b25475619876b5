use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{Datelike, NaiveDate};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::warehouse::QueryOutcome;

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Arrow type a BigQuery result column is materialised as. Types without a
/// lossless Arrow counterpart (NUMERIC, DATETIME, STRUCT, ...) become text.
pub fn bq_type_to_arrow(bq_type: &str) -> DataType {
    match bq_type.to_ascii_uppercase().as_str() {
        "INT64" | "INTEGER" => DataType::Int64,
        "FLOAT64" | "FLOAT" => DataType::Float64,
        "BOOL" | "BOOLEAN" => DataType::Boolean,
        "DATE" => DataType::Date32,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        _ => DataType::Utf8,
    }
}

/// Builds a record batch from the JSON cells of a query result.
pub fn outcome_to_batch(outcome: &QueryOutcome) -> Result<RecordBatch> {
    let fields: Vec<Field> = outcome
        .columns
        .iter()
        .map(|c| Field::new(&c.name, bq_type_to_arrow(&c.data_type), true))
        .collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for (idx, field) in fields.iter().enumerate() {
        let cells = outcome.rows.iter().map(|row| row.get(idx).unwrap_or(&JsonValue::Null));
        columns.push(build_column(field, cells)?);
    }

    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(outcome.rows.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

fn build_column<'a>(
    field: &Field,
    cells: impl Iterator<Item = &'a JsonValue>,
) -> Result<ArrayRef> {
    let bad_cell = |cell: &JsonValue| {
        Error::Format(format!(
            "Column '{}' ({}): cannot convert value {}",
            field.name(),
            field.data_type(),
            cell
        ))
    };

    let array: ArrayRef = match field.data_type() {
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::Number(n) => builder.append_value(n.as_i64().ok_or_else(|| bad_cell(cell))?),
                    JsonValue::String(s) => {
                        builder.append_value(s.parse().map_err(|_| bad_cell(cell))?)
                    }
                    _ => return Err(bad_cell(cell)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::Number(n) => builder.append_value(n.as_f64().ok_or_else(|| bad_cell(cell))?),
                    JsonValue::String(s) => {
                        builder.append_value(s.parse().map_err(|_| bad_cell(cell))?)
                    }
                    _ => return Err(bad_cell(cell)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::Bool(b) => builder.append_value(*b),
                    JsonValue::String(s) => builder.append_value(match s.to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        _ => return Err(bad_cell(cell)),
                    }),
                    _ => return Err(bad_cell(cell)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Date32 => {
            let mut builder = Date32Builder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::String(s) => {
                        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .map_err(|_| bad_cell(cell))?;
                        builder.append_value(date_to_epoch_days(date));
                    }
                    _ => return Err(bad_cell(cell)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let mut builder = TimestampMicrosecondBuilder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::Number(n) => {
                        let secs = n.as_f64().ok_or_else(|| bad_cell(cell))?;
                        builder.append_value(seconds_to_micros(secs));
                    }
                    // The REST API encodes timestamps as (possibly scientific)
                    // epoch seconds in a string.
                    JsonValue::String(s) => {
                        let secs: f64 = s.parse().map_err(|_| bad_cell(cell))?;
                        builder.append_value(seconds_to_micros(secs));
                    }
                    _ => return Err(bad_cell(cell)),
                }
            }
            Arc::new(builder.finish().with_timezone_opt(tz.clone()))
        }
        _ => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                match cell {
                    JsonValue::Null => builder.append_null(),
                    JsonValue::String(s) => builder.append_value(s),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn seconds_to_micros(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}
