use std::path::Path;

use arrow::compute::concat_batches;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;

use super::{create_file, open_file, LoadOptions, SaveOptions};
use crate::error::Result;

/// Whole-table binary snapshot in the Arrow IPC file format. Schema,
/// types and nulls are preserved exactly.
pub(super) fn read_ipc(path: &Path, _options: &LoadOptions) -> Result<RecordBatch> {
    let file = open_file(path)?;
    let reader = FileReader::try_new(file, None)?;
    let schema = reader.schema();

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

pub(super) fn write_ipc(batch: &RecordBatch, path: &Path, _options: &SaveOptions) -> Result<()> {
    let file = create_file(path)?;
    let mut writer = FileWriter::try_new(file, batch.schema_ref())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(())
}
