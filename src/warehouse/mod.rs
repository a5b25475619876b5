//! Access to the BigQuery warehouse.
//!
//! [`WarehouseClient`] holds one [`WarehouseBackend`]: the real
//! [`BigQueryBackend`] or the in-memory [`MockBackend`] used by tests.

mod bigquery;
mod client;
pub mod converters;
mod mock;
mod reference;
pub(crate) mod sql_builder;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub use self::bigquery::BigQueryBackend;
pub use self::client::{estimate_cost, QueryCost, QueryExecution, WarehouseClient};
pub use self::mock::MockBackend;
pub use self::reference::{quote_identifier, DatasetRef, ResolvedDataset, ResolvedTable, TableRef};

use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendMode {
    #[default]
    Mock,
    BigQuery,
}

/// What to do when an upload targets a table that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    #[default]
    Replace,
    Append,
}

impl std::str::FromStr for IfExists {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            "append" => Ok(IfExists::Append),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "if_exists must be one of fail, replace, append; got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Named query parameter, referenced in SQL as `@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    pub name: String,
    pub bq_type: &'static str,
    pub value: Option<String>,
}

impl QueryParameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bq_type: "STRING",
            value: Some(value.into()),
        }
    }

    pub fn int64(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            bq_type: "INT64",
            value: Some(value.to_string()),
        }
    }

    pub fn float64(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            bq_type: "FLOAT64",
            value: Some(value.to_string()),
        }
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            bq_type: "BOOL",
            value: Some(value.to_string()),
        }
    }

    pub fn date(name: impl Into<String>, value: chrono::NaiveDate) -> Self {
        Self {
            name: name.into(),
            bq_type: "DATE",
            value: Some(value.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn null(name: impl Into<String>, bq_type: &'static str) -> Self {
        Self {
            name: name.into(),
            bq_type,
            value: None,
        }
    }
}

/// A single query submission.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
    /// Server-side wait before the call returns with an incomplete job.
    pub timeout: Option<Duration>,
    /// Idempotency token; resubmissions with the same id run at most once.
    pub request_id: String,
}

impl QueryJob {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
            timeout: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<QueryParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<JsonValue>>,
    pub job_id: Option<String>,
    pub bytes_processed: u64,
    pub bytes_billed: u64,
    pub cache_hit: bool,
    pub num_dml_affected_rows: Option<u64>,
}

#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Project queries are billed to and unqualified names resolve against.
    fn project_id(&self) -> &str;

    async fn query(&self, job: &QueryJob) -> Result<QueryOutcome>;

    async fn get_dataset(&self, reference: &DatasetRef) -> Result<ResolvedDataset>;

    async fn get_table(&self, reference: &TableRef) -> Result<ResolvedTable>;
}
