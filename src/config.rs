use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const LOCAL_CONFIG_FILE: &str = "local_config.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Directories {
    pub project_dir: PathBuf,
    pub src_dir: PathBuf,
    pub sql_scripts_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub data_input_dir: PathBuf,
    pub data_output_dir: PathBuf,
    pub plot_dir: PathBuf,
    pub variables_file: PathBuf,
}

impl Directories {
    pub fn rooted_at(project_root: &Path) -> Self {
        let src_dir = project_root.join("src");
        let data_dir = project_root.join("data");
        let config_dir = project_root.join("config");
        Self {
            project_dir: project_root.to_path_buf(),
            sql_scripts_dir: src_dir.join("sql_scripts"),
            data_input_dir: data_dir.join("input"),
            data_output_dir: data_dir.join("output"),
            plot_dir: data_dir.join("plots"),
            variables_file: config_dir.join("env_variables.yaml"),
            src_dir,
            data_dir,
            config_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Constants {
    pub formatted_date: String,
}

impl Constants {
    pub fn for_date(today: NaiveDate) -> Self {
        Self {
            formatted_date: today.format("%Y%m%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// Overrides the project picked up from the credentials.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Price of one TiB billed, in `currency`.
    #[serde(default = "default_price_per_tib")]
    pub price_per_tib: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

fn default_query_timeout_secs() -> u64 {
    120
}

fn default_price_per_tib() -> f64 {
    6.0
}

fn default_currency() -> String {
    "EUR".to_string()
}

fn default_insert_batch_size() -> usize {
    1000
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            query_timeout_secs: default_query_timeout_secs(),
            price_per_tib: default_price_per_tib(),
            currency: default_currency(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub directories: Directories,
    pub constants: Constants,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn defaults(project_root: &Path, today: NaiveDate) -> Self {
        Self {
            directories: Directories::rooted_at(project_root),
            constants: Constants::for_date(today),
            warehouse: WarehouseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Builds the defaults for `project_root` and shadows them with the keys
    /// found in `override_path`. A missing override file leaves the defaults
    /// untouched.
    pub fn load(project_root: &Path, override_path: Option<&Path>, today: NaiveDate) -> Result<Self> {
        let defaults = Self::defaults(project_root, today);

        let mut config = match override_path.filter(|p| p.exists()) {
            Some(p) => {
                debug!(path = %p.display(), "Loading config overrides");
                let contents = std::fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
                let overrides: Value = serde_yaml::from_str(&contents)
                    .map_err(|e| Error::Config(format!("Invalid config file {}: {}", p.display(), e)))?;
                defaults.merged_with(overrides)?
            }
            None => defaults,
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_for_today(project_root: &Path, override_path: Option<&Path>) -> Result<Self> {
        Self::load(project_root, override_path, chrono::Local::now().date_naive())
    }

    /// Loads `<project_root>/config/local_config.yaml` when it exists.
    pub fn discover(project_root: &Path, today: NaiveDate) -> Result<Self> {
        let path = Directories::rooted_at(project_root)
            .config_dir
            .join(LOCAL_CONFIG_FILE);
        Self::load(project_root, Some(&path), today)
    }

    fn merged_with(&self, overrides: Value) -> Result<Self> {
        let overrides = match overrides {
            Value::Null => return Ok(self.clone()),
            Value::Mapping(m) => m,
            other => {
                return Err(Error::Config(format!(
                    "Config overrides must be a mapping, got {}",
                    yaml_type_name(&other)
                )))
            }
        };

        let mut base = serde_yaml::to_value(self)?;
        if let Value::Mapping(base_map) = &mut base {
            merge_mapping(base_map, overrides);
        }

        serde_yaml::from_value(base).map_err(|e| Error::Config(format!("Invalid config override: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(project) = std::env::var("BQ_TOOLKIT_PROJECT_ID") {
            self.warehouse.project_id = Some(project);
        }
        if let Ok(val) = std::env::var("BQ_TOOLKIT_QUERY_TIMEOUT_SECS") {
            self.warehouse.query_timeout_secs = val.parse().map_err(|_| {
                Error::Config(format!("BQ_TOOLKIT_QUERY_TIMEOUT_SECS is not a number: {}", val))
            })?;
        }
        if let Ok(val) = std::env::var("BQ_TOOLKIT_LOG_FORMAT") {
            self.logging.format = match val.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.warehouse.query_timeout_secs == 0 {
            return Err(Error::Config("warehouse.query_timeout_secs must be positive".into()));
        }
        if !(self.warehouse.price_per_tib >= 0.0) {
            return Err(Error::Config("warehouse.price_per_tib must not be negative".into()));
        }
        if self.warehouse.insert_batch_size == 0 {
            return Err(Error::Config("warehouse.insert_batch_size must be positive".into()));
        }
        if !self.directories.project_dir.exists() {
            warn!(path = %self.directories.project_dir.display(), "Project directory does not exist");
        }
        Ok(())
    }
}

fn merge_mapping(base: &mut Mapping, overrides: Mapping) {
    for (key, value) in overrides {
        match value {
            Value::Mapping(nested) => {
                if let Some(Value::Mapping(existing)) = base.get_mut(&key) {
                    merge_mapping(existing, nested);
                } else {
                    base.insert(key, Value::Mapping(nested));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
