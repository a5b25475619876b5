//! Conversions between Arrow data and BigQuery SQL text or result rows.

mod arrow;
mod rows;

#[cfg(test)]
pub(crate) use self::arrow::arrow_value_to_sql;
pub(crate) use self::arrow::arrow_value_to_sql_into;
pub use self::arrow::arrow_type_to_bq_type;
pub use self::rows::{bq_type_to_arrow, outcome_to_batch};

fn escape_sql_string_into(s: &str, buf: &mut String) {
    if !s.bytes().any(|b| b == b'\'' || b == b'\\' || b == b'\n' || b == 0) {
        buf.push_str(s);
        return;
    }
    for c in s.chars() {
        match c {
            '\'' => buf.push_str("\\'"),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\0' => buf.push_str("\\0"),
            _ => buf.push(c),
        }
    }
}
