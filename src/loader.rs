use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::table_io::list_files_with_extension;

pub const SQL_EXTENSION: &str = "sql";

/// A SQL template read from disk. `name` is the file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFile {
    pub name: String,
    pub content: String,
    pub path: PathBuf,
}

pub struct SqlLoader;

impl SqlLoader {
    /// Every `.sql` file directly inside `path`, in lexicographic order.
    pub fn load_dir(path: impl AsRef<Path>) -> Result<Vec<SqlFile>> {
        let files = list_files_with_extension(path.as_ref(), SQL_EXTENSION)?;
        debug!(folder = %path.as_ref().display(), count = files.len(), "Loading SQL files");
        files.iter().map(Self::load_file).collect()
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<SqlFile> {
        let path = path.as_ref();

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid filename: {}", path.display())))?
            .to_string();

        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        Ok(SqlFile {
            name,
            content,
            path: path.to_path_buf(),
        })
    }
}
