use std::fmt::Write;

use arrow::array::*;
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use arrow::util::display::{ArrayFormatter, FormatOptions};

use super::escape_sql_string_into;
use crate::error::{Error, Result};

macro_rules! downcast_or_null {
    ($array:expr, $array_type:ty, $buf:expr) => {
        match $array.as_any().downcast_ref::<$array_type>() {
            Some(arr) => arr,
            None => {
                $buf.push_str("NULL");
                return;
            }
        }
    };
}

/// BigQuery column type used when creating a table for an Arrow field.
pub fn arrow_type_to_bq_type(data_type: &ArrowDataType) -> Result<&'static str> {
    let bq_type = match data_type {
        ArrowDataType::Boolean => "BOOL",
        ArrowDataType::Int8
        | ArrowDataType::Int16
        | ArrowDataType::Int32
        | ArrowDataType::Int64
        | ArrowDataType::UInt8
        | ArrowDataType::UInt16
        | ArrowDataType::UInt32
        | ArrowDataType::UInt64 => "INT64",
        ArrowDataType::Float16 | ArrowDataType::Float32 | ArrowDataType::Float64 => "FLOAT64",
        ArrowDataType::Decimal128(_, _) | ArrowDataType::Decimal256(_, _) => "NUMERIC",
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => "STRING",
        ArrowDataType::Binary | ArrowDataType::LargeBinary | ArrowDataType::FixedSizeBinary(_) => {
            "BYTES"
        }
        ArrowDataType::Date32 | ArrowDataType::Date64 => "DATE",
        ArrowDataType::Timestamp(_, _) => "TIMESTAMP",
        ArrowDataType::Null => "STRING",
        other => {
            return Err(Error::InvalidArgument(format!(
                "Column type {} cannot be uploaded",
                other
            )))
        }
    };
    Ok(bq_type)
}

#[cfg(test)]
pub(crate) fn arrow_value_to_sql(array: &dyn Array, row: usize) -> String {
    let mut buf = String::new();
    arrow_value_to_sql_into(array, row, &mut buf);
    buf
}

/// Appends the SQL literal for `array[row]` to `buf`.
pub(crate) fn arrow_value_to_sql_into(array: &dyn Array, row: usize, buf: &mut String) {
    if array.is_null(row) {
        buf.push_str("NULL");
        return;
    }

    match array.data_type() {
        ArrowDataType::Boolean => {
            let arr = downcast_or_null!(array, BooleanArray, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::Int8 => {
            let arr = downcast_or_null!(array, Int8Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::Int16 => {
            let arr = downcast_or_null!(array, Int16Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::Int32 => {
            let arr = downcast_or_null!(array, Int32Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::Int64 => {
            let arr = downcast_or_null!(array, Int64Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::UInt8 => {
            let arr = downcast_or_null!(array, UInt8Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::UInt16 => {
            let arr = downcast_or_null!(array, UInt16Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::UInt32 => {
            let arr = downcast_or_null!(array, UInt32Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::UInt64 => {
            let arr = downcast_or_null!(array, UInt64Array, buf);
            let _ = write!(buf, "{}", arr.value(row));
        }
        ArrowDataType::Float16 => {
            let arr = downcast_or_null!(array, Float16Array, buf);
            write_float(arr.value(row).to_f64(), buf);
        }
        ArrowDataType::Float32 => {
            let arr = downcast_or_null!(array, Float32Array, buf);
            write_float(arr.value(row) as f64, buf);
        }
        ArrowDataType::Float64 => {
            let arr = downcast_or_null!(array, Float64Array, buf);
            write_float(arr.value(row), buf);
        }
        ArrowDataType::Decimal128(_, _) | ArrowDataType::Decimal256(_, _) => {
            match ArrayFormatter::try_new(array, &FormatOptions::default()) {
                Ok(formatter) => {
                    let _ = write!(buf, "NUMERIC '{}'", formatter.value(row));
                }
                Err(_) => buf.push_str("NULL"),
            }
        }
        ArrowDataType::Utf8 => {
            let arr = downcast_or_null!(array, StringArray, buf);
            buf.push('\'');
            escape_sql_string_into(arr.value(row), buf);
            buf.push('\'');
        }
        ArrowDataType::LargeUtf8 => {
            let arr = downcast_or_null!(array, LargeStringArray, buf);
            buf.push('\'');
            escape_sql_string_into(arr.value(row), buf);
            buf.push('\'');
        }
        ArrowDataType::Date32 => {
            let arr = downcast_or_null!(array, Date32Array, buf);
            let _ = write!(buf, "DATE_FROM_UNIX_DATE({})", arr.value(row));
        }
        ArrowDataType::Date64 => {
            let arr = downcast_or_null!(array, Date64Array, buf);
            let days = arr.value(row).div_euclid(24 * 60 * 60 * 1000);
            let _ = write!(buf, "DATE_FROM_UNIX_DATE({})", days);
        }
        ArrowDataType::Timestamp(unit, _) => {
            let micros = match unit {
                TimeUnit::Second => {
                    let arr = downcast_or_null!(array, TimestampSecondArray, buf);
                    arr.value(row).checked_mul(1_000_000)
                }
                TimeUnit::Millisecond => {
                    let arr = downcast_or_null!(array, TimestampMillisecondArray, buf);
                    arr.value(row).checked_mul(1_000)
                }
                TimeUnit::Microsecond => {
                    let arr = downcast_or_null!(array, TimestampMicrosecondArray, buf);
                    Some(arr.value(row))
                }
                TimeUnit::Nanosecond => {
                    let arr = downcast_or_null!(array, TimestampNanosecondArray, buf);
                    Some(arr.value(row) / 1_000)
                }
            };
            // Values outside the i64 microsecond range cannot be represented.
            match micros {
                Some(micros) => {
                    let _ = write!(buf, "TIMESTAMP_MICROS({})", micros);
                }
                None => buf.push_str("NULL"),
            }
        }
        ArrowDataType::Binary => {
            let arr = downcast_or_null!(array, BinaryArray, buf);
            write_bytes(arr.value(row), buf);
        }
        ArrowDataType::LargeBinary => {
            let arr = downcast_or_null!(array, LargeBinaryArray, buf);
            write_bytes(arr.value(row), buf);
        }
        ArrowDataType::FixedSizeBinary(_) => {
            let arr = downcast_or_null!(array, FixedSizeBinaryArray, buf);
            write_bytes(arr.value(row), buf);
        }
        _ => buf.push_str("NULL"),
    }
}

fn write_float(value: f64, buf: &mut String) {
    if value.is_nan() {
        buf.push_str("CAST('NaN' AS FLOAT64)");
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        let _ = write!(buf, "CAST('{}inf' AS FLOAT64)", sign);
    } else {
        let _ = write!(buf, "{}", value);
    }
}

fn write_bytes(bytes: &[u8], buf: &mut String) {
    buf.push_str("FROM_HEX('");
    for b in bytes {
        let _ = write!(buf, "{:02x}", b);
    }
    buf.push_str("')");
}
