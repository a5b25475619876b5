use metrics::{counter, histogram};
use std::time::Instant;

use crate::error::WarehouseErrorKind;

pub fn record_query_executed(bytes_processed: u64, bytes_billed: u64) {
    counter!("queries_executed_total").increment(1);
    counter!("query_bytes_processed_total").increment(bytes_processed);
    counter!("query_bytes_billed_total").increment(bytes_billed);
}

pub fn record_query_cost(cost: f64) {
    histogram!("query_cost").record(cost);
}

pub fn record_query_error(kind: WarehouseErrorKind) {
    counter!("query_errors_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_query_retry() {
    counter!("query_retries_total").increment(1);
}

pub fn record_query_duration(start: Instant) {
    histogram!("query_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_table_uploaded(rows: u64) {
    counter!("tables_uploaded_total").increment(1);
    counter!("rows_uploaded_total").increment(rows);
}

pub fn record_file_loaded(format: &'static str) {
    counter!("files_loaded_total", "format" => format).increment(1);
}

pub fn record_file_saved(format: &'static str) {
    counter!("files_saved_total", "format" => format).increment(1);
}
