use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::record_batch::RecordBatch;

use super::{create_file, open_file, LoadOptions, SaveOptions};
use crate::error::{Error, Result};

const COMMA: u8 = b',';
const TAB: u8 = b'\t';

pub(super) fn read_csv(path: &Path, options: &LoadOptions) -> Result<RecordBatch> {
    read_delimited(path, COMMA, options)
}

pub(super) fn read_tsv(path: &Path, options: &LoadOptions) -> Result<RecordBatch> {
    read_delimited(path, TAB, options)
}

pub(super) fn write_csv(batch: &RecordBatch, path: &Path, options: &SaveOptions) -> Result<()> {
    write_delimited(batch, path, COMMA, options)
}

pub(super) fn write_tsv(batch: &RecordBatch, path: &Path, options: &SaveOptions) -> Result<()> {
    write_delimited(batch, path, TAB, options)
}

fn read_delimited(path: &Path, delimiter: u8, options: &LoadOptions) -> Result<RecordBatch> {
    let mut file = open_file(path)?;
    let format = Format::default()
        .with_header(options.has_header)
        .with_delimiter(delimiter);

    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io(path, e))?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

fn write_delimited(batch: &RecordBatch, path: &Path, delimiter: u8, options: &SaveOptions) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = WriterBuilder::new()
        .with_header(options.include_header)
        .with_delimiter(delimiter)
        .build(file);
    writer.write(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;
    use tempfile::TempDir;

    #[test]
    fn test_read_csv_infers_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "order_id,amount,customer\n1,9.5,acme\n2,12.0,globex\n").unwrap();

        let batch = read_csv(&path, &LoadOptions::default()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Float64);
        assert_eq!(batch.schema().field(2).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_read_tsv_splits_on_tabs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orders.tsv");
        std::fs::write(&path, "a\tb\nx,y\tz\n").unwrap();

        let batch = read_tsv(&path, &LoadOptions::default()).unwrap();
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(0).name(), "a");
    }

    #[test]
    fn test_write_tsv_uses_tabs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.tsv");
        let batch = crate::table_io::test_support::sample_batch();

        write_tsv(&batch, &path, &SaveOptions::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id\tname\tscore\tactive\n"));
    }

    #[test]
    fn test_write_csv_without_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let batch = crate::table_io::test_support::sample_batch();
        let options = SaveOptions {
            include_header: false,
            ..SaveOptions::default()
        };

        write_csv(&batch, &path, &options).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("1,alice,"));
    }
}
