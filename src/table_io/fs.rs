use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::{glob, Pattern};
use serde_yaml::Value;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Creates `path` and any missing parents. Succeeds if it already exists.
pub fn ensure_directory(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if !path.is_dir() {
        debug!(path = %path.display(), "Creating directory");
        std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;
    }
    Ok(path.to_path_buf())
}

/// Files directly inside `folder` whose name ends in `.{extension}`,
/// as full paths in lexicographic order.
pub fn list_files_with_extension(folder: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(Error::io(
            folder,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let pattern = Path::new(&Pattern::escape(&folder.to_string_lossy()))
        .join(format!("*.{}", Pattern::escape(extension)));
    let pattern_str = pattern.to_string_lossy();

    let mut files: Vec<PathBuf> = glob(&pattern_str)
        .map_err(|e| Error::InvalidArgument(format!("Invalid glob pattern: {}", e)))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    Ok(files)
}

/// Zero-pads `version` to the number of digits in `max_version`.
pub fn format_version(max_version: u64, version: u64) -> Result<String> {
    if version >= max_version {
        error!(version, max_version, "Version is not below the provided max");
        return Err(Error::InvalidArgument(format!(
            "Version ({}) must be lower than the provided max ({})",
            version, max_version
        )));
    }
    let width = max_version.to_string().len();
    Ok(format!("{:0width$}", version, width = width))
}

/// Reads a flat YAML mapping. Scalar values are rendered as strings; nested
/// values are rejected.
pub fn load_yaml_mapping(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let value: Value = serde_yaml::from_str(&contents)?;

    let mapping = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Mapping(m) => m,
        _ => {
            return Err(Error::Config(format!(
                "{} must contain a key/value mapping",
                path.display()
            )))
        }
    };

    mapping
        .into_iter()
        .map(|(k, v)| {
            let key = scalar_to_string(&k).ok_or_else(|| {
                Error::Config(format!("{}: keys must be scalars", path.display()))
            })?;
            let value = scalar_to_string(&v).ok_or_else(|| {
                Error::Config(format!("{}: value of '{}' must be a scalar", path.display(), key))
            })?;
            Ok((key, value))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_version_pads_to_max_width() {
        assert_eq!(format_version(100, 7).unwrap(), "07");
        assert_eq!(format_version(1000, 7).unwrap(), "007");
        assert_eq!(format_version(10, 9).unwrap(), "9");
    }

    #[test]
    fn test_format_version_rejects_out_of_range() {
        assert!(format_version(10, 10).is_err());
        assert!(format_version(10, 11).is_err());
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a").join("b");

        let first = ensure_directory(&target).unwrap();
        assert!(target.is_dir());
        let second = ensure_directory(&target).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_files_with_extension_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.sql"), "SELECT 2").unwrap();
        fs::write(temp_dir.path().join("a.sql"), "SELECT 1").unwrap();
        fs::write(temp_dir.path().join("c.txt"), "notes").unwrap();

        let files = list_files_with_extension(temp_dir.path(), "sql").unwrap();
        assert_eq!(
            files,
            vec![temp_dir.path().join("a.sql"), temp_dir.path().join("b.sql")]
        );
    }

    #[test]
    fn test_list_files_with_extension_not_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let sub_dir = temp_dir.path().join("nested");
        fs::create_dir(&sub_dir).unwrap();
        fs::write(sub_dir.join("deep.sql"), "SELECT 1").unwrap();
        fs::write(temp_dir.path().join("top.sql"), "SELECT 2").unwrap();

        let files = list_files_with_extension(temp_dir.path(), "sql").unwrap();
        assert_eq!(files, vec![temp_dir.path().join("top.sql")]);
    }

    #[test]
    fn test_list_files_with_extension_handles_glob_characters_in_folder() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("run[1]");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("q.sql"), "SELECT 1").unwrap();

        let files = list_files_with_extension(&folder, "sql").unwrap();
        assert_eq!(files, vec![folder.join("q.sql")]);
    }

    #[test]
    fn test_list_files_with_extension_missing_folder() {
        let result = list_files_with_extension("/nonexistent/folder", "sql");
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_load_yaml_mapping_stringifies_scalars() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("env_variables.yaml");
        fs::write(&path, "project: analytics\nyear: 2024\nfull_refresh: false\n").unwrap();

        let vars = load_yaml_mapping(&path).unwrap();
        assert_eq!(vars["project"], "analytics");
        assert_eq!(vars["year"], "2024");
        assert_eq!(vars["full_refresh"], "false");
    }

    #[test]
    fn test_load_yaml_mapping_rejects_nested_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vars.yaml");
        fs::write(&path, "tables:\n  - a\n  - b\n").unwrap();

        let err = load_yaml_mapping(&path).unwrap_err();
        assert!(err.to_string().contains("tables"));
    }
}
