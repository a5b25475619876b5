//! Reading and writing in-memory tables in the supported file formats.
//!
//! Formats are looked up by file extension (case-insensitive) in a static
//! registry. Each entry pairs a reader with a writer, so adding a format is
//! one table row.

mod columnar;
mod delimited;
mod excel;
mod fs;
mod ipc;
mod json;
mod plot;

use std::path::Path;

use arrow::record_batch::RecordBatch;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::metrics;

pub use self::fs::{ensure_directory, format_version, list_files_with_extension, load_yaml_mapping};
pub use self::plot::{save_plot, Figure, PlotFormat};

pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SheetSelector {
    #[default]
    First,
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub sheet: SheetSelector,
    pub has_header: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sheet: SheetSelector::First,
            has_header: true,
        }
    }
}

impl LoadOptions {
    pub fn with_sheet(mut self, sheet: SheetSelector) -> Self {
        self.sheet = sheet;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub sheet_name: String,
    pub include_header: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            include_header: true,
        }
    }
}

impl SaveOptions {
    pub fn with_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = name.into();
        self
    }
}

type ReadFn = fn(&Path, &LoadOptions) -> Result<RecordBatch>;
type WriteFn = fn(&RecordBatch, &Path, &SaveOptions) -> Result<()>;

pub struct TableFormat {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    read: ReadFn,
    write: WriteFn,
}

impl std::fmt::Debug for TableFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFormat")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

static FORMATS: &[TableFormat] = &[
    TableFormat {
        name: "csv",
        extensions: &["csv"],
        read: delimited::read_csv,
        write: delimited::write_csv,
    },
    TableFormat {
        name: "tsv",
        extensions: &["tsv"],
        read: delimited::read_tsv,
        write: delimited::write_tsv,
    },
    TableFormat {
        name: "xlsx",
        extensions: &["xlsx"],
        read: excel::read_xlsx,
        write: excel::write_xlsx,
    },
    TableFormat {
        name: "parquet",
        extensions: &["parquet"],
        read: columnar::read_parquet,
        write: columnar::write_parquet,
    },
    TableFormat {
        name: "arrow",
        extensions: &["arrow", "ipc", "feather"],
        read: ipc::read_ipc,
        write: ipc::write_ipc,
    },
    TableFormat {
        name: "json",
        extensions: &["json"],
        read: json::read_json,
        write: json::write_json,
    },
    TableFormat {
        name: "ndjson",
        extensions: &["ndjson", "jsonl"],
        read: json::read_ndjson,
        write: json::write_ndjson,
    },
];

impl TableFormat {
    pub fn all() -> &'static [TableFormat] {
        FORMATS
    }

    pub fn for_extension(extension: &str) -> Option<&'static TableFormat> {
        let extension = extension.to_ascii_lowercase();
        FORMATS
            .iter()
            .find(|f| f.extensions.contains(&extension.as_str()))
    }

    pub fn for_path(path: &Path) -> Result<&'static TableFormat> {
        let extension = extension_of(path);
        Self::for_extension(&extension).ok_or_else(|| {
            let err = Error::UnsupportedFormat {
                extension,
                supported: supported_extensions(),
            };
            error!(path = %path.display(), "{}", err);
            err
        })
    }

    pub fn read(&self, path: &Path, options: &LoadOptions) -> Result<RecordBatch> {
        (self.read)(path, options)
    }

    pub fn write(&self, batch: &RecordBatch, path: &Path, options: &SaveOptions) -> Result<()> {
        (self.write)(batch, path, options)
    }
}

pub fn supported_extensions() -> String {
    FORMATS
        .iter()
        .flat_map(|f| f.extensions.iter())
        .map(|e| format!(".{}", e))
        .collect::<Vec<_>>()
        .join(", ")
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Loads a table, picking the reader from the file extension.
pub fn load_table(path: impl AsRef<Path>, options: &LoadOptions) -> Result<RecordBatch> {
    let path = path.as_ref();
    let format = TableFormat::for_path(path)?;
    debug!(path = %path.display(), format = format.name, "Loading table");

    let batch = format.read(path, options)?;
    metrics::record_file_loaded(format.name);
    Ok(batch)
}

/// Saves a table, creating the destination directory first.
pub fn save_table(batch: &RecordBatch, path: impl AsRef<Path>, options: &SaveOptions) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    let format = TableFormat::for_path(path)?;
    debug!(
        path = %path.display(),
        format = format.name,
        rows = batch.num_rows(),
        "Saving table"
    );

    format.write(batch, path, options)?;
    metrics::record_file_saved(format.name);
    Ok(())
}

fn create_file(path: &Path) -> Result<std::fs::File> {
    std::fs::File::create(path).map_err(|e| Error::io(path, e))
}

fn open_file(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|e| Error::io(path, e))
}
