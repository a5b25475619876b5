//! Running SQL template files through a [`WarehouseClient`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use tracing::{debug, info};

use crate::config::WarehouseConfig;
use crate::error::{Error, Result};
use crate::loader::SqlLoader;
use crate::table_io::load_yaml_mapping;
use crate::warehouse::{WarehouseBackend, WarehouseClient};

/// Placeholder values keyed by name, substituted for `{name}`.
pub type Variables = BTreeMap<String, String>;

/// Key injected by [`extract_whole_table`].
pub const LIMIT_VARIABLE: &str = "limit";

/// Replaces each `{key}` whose key is in `variables` with its value.
///
/// Unknown placeholders are left as they are and unused variables are
/// ignored. Substitution is a single left-to-right pass, so braces inside
/// substituted values are never expanded again. Keys may contain braces;
/// when several keys match at the same `{`, the longest one wins.
pub fn fill_template(text: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let matched = variables
            .iter()
            .filter(|(key, _)| {
                after
                    .strip_prefix(key.as_str())
                    .is_some_and(|tail| tail.starts_with('}'))
            })
            .max_by_key(|(key, _)| key.len());
        match matched {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `folder` itself when no file name is given, otherwise `folder/filename`.
pub fn resolve_sql_path(folder: &Path, filename: Option<&str>) -> PathBuf {
    match filename {
        Some(name) => folder.join(name),
        None => folder.to_path_buf(),
    }
}

/// Reads the variables file into a mapping.
pub fn load_variables(path: impl AsRef<Path>) -> Result<Variables> {
    load_yaml_mapping(path)
}

fn render_sql_file(path: &Path, variables: Option<&Variables>) -> Result<String> {
    let file = SqlLoader::load_file(path)?;
    Ok(match variables {
        Some(vars) if !vars.is_empty() => fill_template(&file.content, vars),
        _ => file.content,
    })
}

/// Reads a SQL file, fills its placeholders and runs it. The result is
/// materialised only when `return_table` is set.
pub async fn execute_sql_file<B: WarehouseBackend>(
    client: &WarehouseClient<B>,
    folder: &Path,
    filename: Option<&str>,
    variables: Option<&Variables>,
    return_table: bool,
) -> Result<Option<RecordBatch>> {
    let path = resolve_sql_path(folder, filename);
    debug!(path = %path.display(), "Executing SQL file");
    let sql = render_sql_file(&path, variables)?;
    client.run_query(&sql, &[], return_table).await
}

/// Runs every `.sql` file directly inside `folder` in lexicographic order,
/// discarding results. Stops at the first failure. Returns the number of
/// files executed.
pub async fn execute_sql_folder<B: WarehouseBackend>(
    client: &WarehouseClient<B>,
    folder: &Path,
    variables: Option<&Variables>,
) -> Result<usize> {
    let files = SqlLoader::load_dir(folder)?;
    for file in &files {
        info!(script = %file.name, "Executing SQL script");
        let sql = match variables {
            Some(vars) if !vars.is_empty() => fill_template(&file.content, vars),
            _ => file.content.clone(),
        };
        client.run_query(&sql, &[], false).await?;
    }
    Ok(files.len())
}

fn limit_clause(limit: u64) -> String {
    if limit > 0 {
        format!("LIMIT {}", limit)
    } else {
        String::new()
    }
}

/// Runs `query_folder/filename` with `{limit}` set to `LIMIT n` (or empty
/// when `limit` is 0) and returns the whole result.
pub async fn extract_whole_table_with<B: WarehouseBackend>(
    client: &WarehouseClient<B>,
    filename: &str,
    variables: &Variables,
    query_folder: &Path,
    limit: u64,
) -> Result<RecordBatch> {
    let mut variables = variables.clone();
    variables.insert(LIMIT_VARIABLE.to_string(), limit_clause(limit));

    execute_sql_file(client, query_folder, Some(filename), Some(&variables), true)
        .await?
        .ok_or_else(|| Error::Format(format!("Query {} returned no table", filename)))
}

/// Connects a BigQuery client from `config` and runs
/// [`extract_whole_table_with`].
pub async fn extract_whole_table(
    config: &WarehouseConfig,
    filename: &str,
    variables: &Variables,
    query_folder: &Path,
    limit: u64,
) -> Result<RecordBatch> {
    let client = WarehouseClient::connect(config).await?;
    extract_whole_table_with(&client, filename, variables, query_folder, limit).await
}
