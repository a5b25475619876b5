use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use calamine::{open_workbook, Data, Dimensions, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook};

use super::{LoadOptions, SaveOptions, SheetSelector};
use crate::error::{Error, Result};

static EMPTY_CELL: Data = Data::Empty;

pub(super) fn read_xlsx(path: &Path, options: &LoadOptions) -> Result<RecordBatch> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| Error::Format(format!("Cannot open workbook {}: {}", path.display(), e)))?;

    let sheet_names = workbook.sheet_names();
    let sheet_name = match &options.sheet {
        SheetSelector::First => sheet_names.first().cloned(),
        SheetSelector::Index(i) => sheet_names.get(*i).cloned(),
        SheetSelector::Name(name) => sheet_names.iter().find(|s| *s == name).cloned(),
    }
    .ok_or_else(|| {
        Error::InvalidArgument(format!(
            "Sheet {:?} not found in {}, available: {}",
            options.sheet,
            path.display(),
            sheet_names.join(", ")
        ))
    })?;

    // The declared dimension also covers blank cells, which the value
    // range drops, so trailing all-null rows keep their place.
    let declared = workbook
        .worksheet_cells_reader(&sheet_name)
        .map(|reader| reader.dimensions())
        .ok();
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| Error::Format(format!("Cannot read sheet '{}': {}", sheet_name, e)))?;

    let (height, width) = sheet_extent(range.end(), declared);
    let cell = |row: u32, col: u32| range.get_value((row, col)).unwrap_or(&EMPTY_CELL);

    let body_start: u32 = if options.has_header { 1 } else { 0 };
    let header: Vec<String> = (0..width)
        .map(|col| {
            if options.has_header {
                cell(0, col).to_string()
            } else {
                format!("column_{}", col)
            }
        })
        .collect();

    let mut fields = Vec::with_capacity(header.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(header.len());
    for (col, name) in (0u32..).zip(header.iter()) {
        let cells: Vec<&Data> = (body_start..height.max(body_start))
            .map(|row| cell(row, col))
            .collect();
        let column = build_column(&cells);
        fields.push(Field::new(name, column.data_type().clone(), true));
        columns.push(column);
    }

    let num_rows = height.saturating_sub(body_start) as usize;
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        columns,
        &options,
    )?)
}

/// Rows and columns to read, counted from A1. A sheet without values only
/// has an extent when its declared dimension goes beyond A1.
fn sheet_extent(value_end: Option<(u32, u32)>, declared: Option<Dimensions>) -> (u32, u32) {
    let declared_end = declared
        .filter(|d| value_end.is_some() || d.end != (0, 0))
        .map(|d| d.end);
    match (value_end, declared_end) {
        (None, None) => (0, 0),
        (Some(end), None) | (None, Some(end)) => (end.0 + 1, end.1 + 1),
        (Some(a), Some(b)) => (a.0.max(b.0) + 1, a.1.max(b.1) + 1),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Bool,
    Int,
    Float,
    Text,
}

/// Picks the narrowest column type: all-boolean, all-integral numbers,
/// numbers, then text. Empty cells become nulls and do not vote.
fn infer_kind(cells: &[&Data]) -> CellKind {
    let mut kind: Option<CellKind> = None;
    for cell in cells {
        let cell_kind = match cell {
            Data::Empty => continue,
            Data::Bool(_) => CellKind::Bool,
            Data::Int(_) => CellKind::Int,
            Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => CellKind::Int,
            Data::Float(_) => CellKind::Float,
            _ => CellKind::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(CellKind::Int), CellKind::Float) | (Some(CellKind::Float), CellKind::Int) => {
                CellKind::Float
            }
            _ => CellKind::Text,
        });
    }
    kind.unwrap_or(CellKind::Text)
}

fn build_column(cells: &[&Data]) -> ArrayRef {
    match infer_kind(cells) {
        CellKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Bool(b) => builder.append_value(*b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        CellKind::Int => {
            let mut builder = Int64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Int(i) => builder.append_value(*i),
                    Data::Float(f) => builder.append_value(*f as i64),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        CellKind::Float => {
            let mut builder = Float64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Data::Int(i) => builder.append_value(*i as f64),
                    Data::Float(f) => builder.append_value(*f),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        CellKind::Text => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                match cell {
                    Data::Empty => builder.append_null(),
                    other => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

pub(super) fn write_xlsx(batch: &RecordBatch, path: &Path, options: &SaveOptions) -> Result<()> {
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| Error::Format(format!("xlsx: {}", e));

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&options.sheet_name).map_err(xlsx_err)?;

    let first_row: u32 = if options.include_header { 1 } else { 0 };
    if options.include_header {
        for (col, field) in batch.schema_ref().fields().iter().enumerate() {
            worksheet
                .write_string(0, col as u16, field.name())
                .map_err(xlsx_err)?;
        }
    }

    let blank = Format::new();
    for (col, array) in batch.columns().iter().enumerate() {
        let col = col as u16;
        // Nulls are written as blank cells so the sheet dimension keeps
        // trailing empty rows.
        for row in (0..array.len()).filter(|row| array.is_null(*row)) {
            worksheet
                .write_blank(first_row + row as u32, col, &blank)
                .map_err(xlsx_err)?;
        }
        let cells = (0..array.len()).filter(|row| !array.is_null(*row));
        match array.data_type() {
            DataType::Boolean => {
                let values = array.as_boolean();
                for row in cells {
                    worksheet
                        .write_boolean(first_row + row as u32, col, values.value(row))
                        .map_err(xlsx_err)?;
                }
            }
            dt if dt.is_numeric() => {
                let floats = cast(array, &DataType::Float64)?;
                let values = floats.as_primitive::<Float64Type>();
                for row in cells {
                    worksheet
                        .write_number(first_row + row as u32, col, values.value(row))
                        .map_err(xlsx_err)?;
                }
            }
            _ => {
                let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())?;
                for row in cells {
                    worksheet
                        .write_string(first_row + row as u32, col, formatter.value(row).to_string())
                        .map_err(xlsx_err)?;
                }
            }
        }
    }

    workbook.save(path).map_err(xlsx_err)?;
    Ok(())
}
