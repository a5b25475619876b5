use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;

use super::converters::{arrow_type_to_bq_type, arrow_value_to_sql_into};
use super::reference::{quote_identifier, TableRef};
use super::IfExists;
use crate::error::{Error, Result};

/// Largest INSERT statement produced. BigQuery rejects query text over
/// 1 MiB; the margin leaves room for the request envelope.
pub(crate) const MAX_STATEMENT_BYTES: usize = 900 * 1024;

/// Hours a staging table lives if the upload never gets to drop it.
const STAGING_EXPIRATION_HOURS: u32 = 24;

fn column_definitions(table: &TableRef, schema: &Schema) -> Result<String> {
    if schema.fields().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "Cannot create {} without columns",
            table
        )));
    }

    let mut sql = String::with_capacity(schema.fields().len() * 24);
    sql.push('(');
    for (i, field) in schema.fields().iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('`');
        sql.push_str(&quote_identifier(field.name()));
        sql.push_str("` ");
        sql.push_str(arrow_type_to_bq_type(field.data_type())?);
    }
    sql.push(')');
    Ok(sql)
}

/// `CREATE TABLE IF NOT EXISTS` with columns derived from `schema`.
pub(crate) fn build_ensure_table_sql(table: &TableRef, schema: &Schema) -> Result<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} {}",
        table.sql_identifier(),
        column_definitions(table, schema)?
    ))
}

/// Staging table DDL. The table expires on its own so a failed cleanup
/// does not leave it behind.
pub(crate) fn build_staging_table_sql(staging: &TableRef, schema: &Schema) -> Result<String> {
    Ok(format!(
        "CREATE TABLE {} {} OPTIONS (expiration_timestamp = \
         TIMESTAMP_ADD(CURRENT_TIMESTAMP(), INTERVAL {} HOUR))",
        staging.sql_identifier(),
        column_definitions(staging, schema)?,
        STAGING_EXPIRATION_HOURS
    ))
}

/// Single statement moving the staged rows into `table` under the conflict
/// policy. `Replace` swaps the table in one `CREATE OR REPLACE`, `Fail`
/// relies on the service rejecting an existing table and `Append` inserts
/// into the table, which must exist.
pub(crate) fn build_publish_sql(
    table: &TableRef,
    staging: &TableRef,
    column_names: &[String],
    if_exists: IfExists,
) -> String {
    let columns = column_names
        .iter()
        .map(|c| format!("`{}`", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let select = format!("SELECT {} FROM {}", columns, staging.sql_identifier());
    match if_exists {
        IfExists::Replace => {
            format!("CREATE OR REPLACE TABLE {} AS {}", table.sql_identifier(), select)
        }
        IfExists::Fail => format!("CREATE TABLE {} AS {}", table.sql_identifier(), select),
        IfExists::Append => format!(
            "INSERT INTO {} ({}) {}",
            table.sql_identifier(),
            columns,
            select
        ),
    }
}

pub(crate) fn build_drop_table_sql(table: &TableRef) -> String {
    format!("DROP TABLE IF EXISTS {}", table.sql_identifier())
}

/// Renders rows `start..end` of `batch` as `(v1, v2, ...)` tuples.
pub(crate) fn render_rows(batch: &RecordBatch, start: usize, end: usize) -> Vec<String> {
    let columns = batch.columns();
    let avg_row_len = columns.len() * 16 + 2;
    let mut all_values = String::with_capacity((end - start) * (avg_row_len + 1));
    let mut offsets: Vec<usize> = Vec::with_capacity(end - start + 1);
    offsets.push(0);

    for row in start..end {
        all_values.push('(');
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                all_values.push_str(", ");
            }
            arrow_value_to_sql_into(column.as_ref(), row, &mut all_values);
        }
        all_values.push(')');
        offsets.push(all_values.len());
    }

    offsets
        .windows(2)
        .map(|w| all_values[w[0]..w[1]].to_string())
        .collect()
}

pub(crate) fn build_insert_sql(table: &TableRef, column_names: &[String], values: &[String]) -> String {
    let quoted_table = table.sql_identifier();
    let values_total_len: usize = values.iter().map(|v| v.len()).sum();
    let values_joined_len = values_total_len + values.len().saturating_sub(1) * 2;
    let cols_estimated_len: usize = column_names.iter().map(|c| c.len() + 4).sum();
    let mut sql =
        String::with_capacity(20 + quoted_table.len() + cols_estimated_len + values_joined_len);

    sql.push_str("INSERT INTO ");
    sql.push_str(&quoted_table);
    sql.push_str(" (");
    for (i, c) in column_names.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('`');
        sql.push_str(&quote_identifier(c));
        sql.push('`');
    }
    sql.push_str(") VALUES ");
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(v);
    }
    sql
}

/// INSERT statements covering every row of `batch`. A statement holds at
/// most `batch_size` rows and stays under `max_bytes`; a single row that
/// cannot fit on its own is an error.
pub(crate) fn build_insert_statements(
    table: &TableRef,
    batch: &RecordBatch,
    batch_size: usize,
    max_bytes: usize,
) -> Result<Vec<String>> {
    let column_names: Vec<String> = batch
        .schema_ref()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let batch_size = batch_size.max(1);
    let header_len = build_insert_sql(table, &column_names, &[]).len();

    let mut statements = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut pending_len = header_len;

    for start in (0..batch.num_rows()).step_by(batch_size) {
        let end = (start + batch_size).min(batch.num_rows());
        for (offset, row) in render_rows(batch, start, end).into_iter().enumerate() {
            if header_len + row.len() > max_bytes {
                return Err(Error::InvalidArgument(format!(
                    "Row {} of {} renders to {} bytes, over the {} byte statement limit",
                    start + offset,
                    table,
                    row.len(),
                    max_bytes
                )));
            }
            let fits = pending.is_empty()
                || (pending.len() < batch_size && pending_len + 2 + row.len() <= max_bytes);
            if !fits {
                statements.push(build_insert_sql(table, &column_names, &pending));
                pending.clear();
                pending_len = header_len;
            }
            if !pending.is_empty() {
                pending_len += 2;
            }
            pending_len += row.len();
            pending.push(row);
        }
    }
    if !pending.is_empty() {
        statements.push(build_insert_sql(table, &column_names, &pending));
    }
    Ok(statements)
}
