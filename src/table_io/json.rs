use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use arrow::error::ArrowError;
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::{ArrayWriter, LineDelimitedWriter, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};

use super::{create_file, open_file, LoadOptions, SaveOptions};
use crate::error::{Error, Result};

/// Reads either an array of records (`[{"a": 1}, ...]`) or a column-keyed
/// object (`{"a": {"0": 1, "1": 2}}`).
pub(super) fn read_json(path: &Path, _options: &LoadOptions) -> Result<RecordBatch> {
    let file = open_file(path)?;
    let value: Value = serde_json::from_reader(BufReader::new(file))?;

    let rows = match value {
        Value::Array(items) => items,
        Value::Object(columns) => columns_to_records(columns)?,
        other => {
            return Err(Error::Format(format!(
                "{}: expected an array of records or a column object, got {}",
                path.display(),
                json_type_name(&other)
            )))
        }
    };

    records_to_batch(&rows)
}

pub(super) fn read_ndjson(path: &Path, _options: &LoadOptions) -> Result<RecordBatch> {
    let file = open_file(path)?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str::<Value>(&line)?);
    }

    records_to_batch(&rows)
}

pub(super) fn write_json(batch: &RecordBatch, path: &Path, _options: &SaveOptions) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = ArrayWriter::new(file);
    writer.write(batch)?;
    writer.finish()?;
    Ok(())
}

pub(super) fn write_ndjson(batch: &RecordBatch, path: &Path, _options: &SaveOptions) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = LineDelimitedWriter::new(file);
    writer.write(batch)?;
    writer.finish()?;
    Ok(())
}

fn records_to_batch(rows: &[Value]) -> Result<RecordBatch> {
    if let Some(bad) = rows.iter().find(|r| !r.is_object()) {
        return Err(Error::Format(format!(
            "JSON records must be objects, found {}",
            json_type_name(bad)
        )));
    }

    let schema = Arc::new(infer_json_schema_from_iterator(
        rows.iter().map(Ok::<_, ArrowError>),
    )?);

    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(rows.len().max(1))
        .build_decoder()?;
    decoder.serialize(rows)?;

    Ok(decoder
        .flush()?
        .unwrap_or_else(|| RecordBatch::new_empty(schema)))
}

/// Pivots `{"col": {"<row>": value}}` into one object per row, ordering
/// rows by their numeric key when every key parses as an integer.
fn columns_to_records(columns: Map<String, Value>) -> Result<Vec<Value>> {
    let mut row_keys: Vec<String> = Vec::new();
    for (name, column) in &columns {
        let cells = column.as_object().ok_or_else(|| {
            Error::Format(format!(
                "Column '{}' must map row keys to values, got {}",
                name,
                json_type_name(column)
            ))
        })?;
        for key in cells.keys() {
            if !row_keys.contains(key) {
                row_keys.push(key.clone());
            }
        }
    }

    if row_keys.iter().all(|k| k.parse::<u64>().is_ok()) {
        row_keys.sort_by_key(|k| k.parse::<u64>().unwrap_or_default());
    }

    Ok(row_keys
        .iter()
        .map(|key| {
            let record: Map<String, Value> = columns
                .iter()
                .map(|(name, column)| (name.clone(), column.get(key).cloned().unwrap_or(Value::Null)))
                .collect();
            Value::Object(record)
        })
        .collect())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
