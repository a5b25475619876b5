use std::time::Duration;

use async_trait::async_trait;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::error::{Error as HttpError, ErrorResponse};
use google_cloud_bigquery::http::job::get::GetJobRequest;
use google_cloud_bigquery::http::job::get_query_results::GetQueryResultsRequest;
use google_cloud_bigquery::http::job::query::QueryRequest;
use google_cloud_bigquery::http::job::JobReference;
use google_cloud_bigquery::http::table::{TableFieldType, TableSchema};
use google_cloud_bigquery::http::tabledata::list::{Tuple, Value as BqValue};
use google_cloud_bigquery::http::types::{
    QueryParameter as BqQueryParameter, QueryParameterType, QueryParameterValue,
};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::{
    BackendMode, ColumnInfo, DatasetRef, QueryJob, QueryOutcome, QueryParameter, ResolvedDataset,
    ResolvedTable, TableRef, WarehouseBackend,
};
use crate::error::{Result, WarehouseError, WarehouseErrorKind};

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Backend talking to the BigQuery REST API with application default
/// credentials.
pub struct BigQueryBackend {
    client: Client,
    project_id: String,
}

impl BigQueryBackend {
    /// Authenticates and creates the client. `project_id` overrides the
    /// project found in the credentials.
    pub async fn connect(project_id: Option<&str>) -> Result<Self> {
        let (config, credentials_project) = ClientConfig::new_with_auth()
            .await
            .map_err(|e| WarehouseError::from_source("Failed to authenticate", e))?;

        let project_id = project_id
            .map(str::to_string)
            .or(credentials_project)
            .ok_or_else(|| {
                WarehouseError::new(
                    WarehouseErrorKind::PermissionDenied,
                    "No project_id configured and none found in credentials",
                )
            })?;

        let client = Client::new(config)
            .await
            .map_err(|e| WarehouseError::from_source("Failed to create BigQuery client", e))?;

        info!(project_id = %project_id, "BigQuery client created");
        Ok(Self { client, project_id })
    }

    async fn query_impl(&self, job: &QueryJob) -> Result<QueryOutcome> {
        let request = QueryRequest {
            query: job.sql.clone(),
            use_legacy_sql: false,
            timeout_ms: job.timeout.map(|t| t.as_millis() as i64),
            request_id: Some(job.request_id.clone()),
            query_parameters: job.parameters.iter().map(to_bq_parameter).collect(),
            ..Default::default()
        };

        let response = self
            .client
            .job()
            .query(&self.project_id, &request)
            .await
            .map_err(|e| http_error("BigQuery query failed", e))?;

        let job_ref = response.job_reference.clone();
        let mut schema = response.schema;
        let mut rows = tuples_to_rows(response.rows.unwrap_or_default());
        let mut page_token = response.page_token;
        let mut job_complete = response.job_complete;
        let mut interval = Duration::from_millis(500);
        let mut poll_count = 0u32;

        while !job_complete || page_token.is_some() {
            poll_count += 1;
            if !job_complete && poll_count > 1 {
                tokio::time::sleep(interval).await;
                interval = (interval * 2).min(MAX_POLL_INTERVAL);
            }
            if poll_count % 10 == 0 {
                info!(
                    job_id = %job_ref.job_id,
                    poll_count = poll_count,
                    "BigQuery job polling in progress"
                );
            }

            let results_request = GetQueryResultsRequest {
                page_token: page_token.clone(),
                timeout_ms: job.timeout.map(|t| t.as_millis() as i64),
                location: job_ref.location.clone(),
                ..Default::default()
            };
            let page = self
                .client
                .job()
                .get_query_results(&job_ref.project_id, &job_ref.job_id, &results_request)
                .await
                .map_err(|e| http_error("Failed to fetch query results", e))?;

            job_complete = page.job_complete;
            if !job_complete {
                continue;
            }
            if schema.is_none() {
                schema = page.schema;
            }
            rows.extend(tuples_to_rows(page.rows.unwrap_or_default()));
            page_token = page.page_token;
        }

        let columns = schema.as_ref().map(schema_columns).unwrap_or_default();
        let (bytes_processed, bytes_billed, cache_hit) = self.job_statistics(&job_ref).await;

        debug!(
            job_id = %job_ref.job_id,
            rows = rows.len(),
            "BigQuery job completed"
        );

        Ok(QueryOutcome {
            columns,
            rows,
            job_id: Some(job_ref.job_id),
            bytes_processed,
            bytes_billed,
            cache_hit,
            num_dml_affected_rows: response.num_dml_affected_rows.map(|n| n.max(0) as u64),
        })
    }

    /// Byte counts come from the job resource; the query response does not
    /// carry bytes billed. Missing statistics are logged and reported as 0.
    async fn job_statistics(&self, job_ref: &JobReference) -> (u64, u64, bool) {
        let request = GetJobRequest {
            location: job_ref.location.clone(),
        };
        match self
            .client
            .job()
            .get(&job_ref.project_id, &job_ref.job_id, &request)
            .await
        {
            Ok(job) => {
                let query_stats = job.statistics.and_then(|s| s.query);
                let processed = query_stats
                    .as_ref()
                    .and_then(|q| q.total_bytes_processed)
                    .unwrap_or(0);
                let billed = query_stats
                    .as_ref()
                    .and_then(|q| q.total_bytes_billed)
                    .unwrap_or(0);
                let cache_hit = query_stats.and_then(|q| q.cache_hist).unwrap_or(false);
                (processed.max(0) as u64, billed.max(0) as u64, cache_hit)
            }
            Err(e) => {
                warn!(job_id = %job_ref.job_id, error = %e, "Failed to fetch job statistics");
                (0, 0, false)
            }
        }
    }
}

#[async_trait]
impl WarehouseBackend for BigQueryBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::BigQuery
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn query(&self, job: &QueryJob) -> Result<QueryOutcome> {
        self.query_impl(job).await
    }

    async fn get_dataset(&self, reference: &DatasetRef) -> Result<ResolvedDataset> {
        let dataset = self
            .client
            .dataset()
            .get(&reference.project, &reference.dataset)
            .await
            .map_err(|e| http_error(&format!("Failed to get dataset {}", reference), e))?;

        let resource = serde_json::to_value(&dataset)?;
        Ok(ResolvedDataset {
            reference: reference.clone(),
            location: resource
                .get("location")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    async fn get_table(&self, reference: &TableRef) -> Result<ResolvedTable> {
        let table = self
            .client
            .table()
            .get(&reference.project, &reference.dataset, &reference.table)
            .await
            .map_err(|e| http_error(&format!("Failed to get table {}", reference), e))?;

        let columns = table.schema.as_ref().map(schema_columns).unwrap_or_default();
        let resource = serde_json::to_value(&table)?;
        let num_rows = resource.get("numRows").and_then(|v| match v {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        });

        Ok(ResolvedTable {
            reference: reference.clone(),
            columns,
            num_rows,
        })
    }
}

/// Wraps a REST error. The kind comes from the response status and typed
/// reasons when the service answered, from the transport failure when it
/// did not, and from the message only as a last resort.
fn http_error(context: &str, err: HttpError) -> WarehouseError {
    let kind = match &err {
        HttpError::Response(response) => Some(response_kind(response)),
        HttpError::HttpClient(e) if e.is_timeout() => Some(WarehouseErrorKind::DeadlineExceeded),
        HttpError::HttpClient(e) if e.is_connect() => Some(WarehouseErrorKind::Transient),
        _ => None,
    };
    let wrapped = WarehouseError::from_source(context, err);
    match kind {
        Some(kind) => wrapped.with_kind(kind),
        None => wrapped,
    }
}

fn response_kind(response: &ErrorResponse) -> WarehouseErrorKind {
    WarehouseErrorKind::from_response(
        response.code,
        response
            .errors
            .iter()
            .flatten()
            .map(|item| item.reason.as_str()),
    )
}

fn to_bq_parameter(param: &QueryParameter) -> BqQueryParameter {
    BqQueryParameter {
        name: Some(param.name.clone()),
        parameter_type: QueryParameterType {
            parameter_type: param.bq_type.to_string(),
            ..Default::default()
        },
        parameter_value: QueryParameterValue {
            value: param.value.clone(),
            ..Default::default()
        },
    }
}

fn schema_columns(schema: &TableSchema) -> Vec<ColumnInfo> {
    schema
        .fields
        .iter()
        .map(|field| ColumnInfo {
            name: field.name.clone(),
            data_type: bq_type_to_string(&field.data_type).to_string(),
        })
        .collect()
}

fn tuples_to_rows(tuples: Vec<Tuple>) -> Vec<Vec<JsonValue>> {
    tuples
        .into_iter()
        .map(|tuple| tuple.f.into_iter().map(|cell| bq_value_to_json(cell.v)).collect())
        .collect()
}

fn bq_type_to_string(field_type: &TableFieldType) -> &'static str {
    match field_type {
        TableFieldType::String => "STRING",
        TableFieldType::Bytes => "BYTES",
        TableFieldType::Integer | TableFieldType::Int64 => "INT64",
        TableFieldType::Float | TableFieldType::Float64 => "FLOAT64",
        TableFieldType::Boolean | TableFieldType::Bool => "BOOLEAN",
        TableFieldType::Timestamp => "TIMESTAMP",
        TableFieldType::Record | TableFieldType::Struct => "STRUCT",
        TableFieldType::Date => "DATE",
        TableFieldType::Time => "TIME",
        TableFieldType::Datetime => "DATETIME",
        TableFieldType::Numeric | TableFieldType::Decimal => "NUMERIC",
        TableFieldType::Bignumeric | TableFieldType::Bigdecimal => "BIGNUMERIC",
        TableFieldType::Interval => "INTERVAL",
        TableFieldType::Json => "JSON",
    }
}

fn bq_value_to_json(value: BqValue) -> JsonValue {
    match value {
        BqValue::Null => JsonValue::Null,
        BqValue::String(s) => JsonValue::String(s),
        BqValue::Array(cells) => {
            JsonValue::Array(cells.into_iter().map(|c| bq_value_to_json(c.v)).collect())
        }
        BqValue::Struct(tuple) => {
            JsonValue::Array(tuple.f.into_iter().map(|c| bq_value_to_json(c.v)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bq_type_to_string_aliases() {
        assert_eq!(bq_type_to_string(&TableFieldType::Integer), "INT64");
        assert_eq!(bq_type_to_string(&TableFieldType::Float), "FLOAT64");
        assert_eq!(bq_type_to_string(&TableFieldType::Bool), "BOOLEAN");
    }

    #[test]
    fn test_bq_value_to_json_nested() {
        assert_eq!(bq_value_to_json(BqValue::Null), JsonValue::Null);
        assert_eq!(
            bq_value_to_json(BqValue::String("42".into())),
            JsonValue::String("42".into())
        );
    }

    fn response(code: u16, reasons: &[&str], message: &str) -> ErrorResponse {
        let errors: Vec<JsonValue> = reasons
            .iter()
            .map(|r| serde_json::json!({ "message": message, "reason": r }))
            .collect();
        serde_json::from_value(serde_json::json!({
            "code": code,
            "errors": errors,
            "message": message,
        }))
        .unwrap()
    }

    #[test]
    fn test_http_error_uses_response_reason() {
        let err = http_error(
            "BigQuery query failed",
            HttpError::Response(response(
                400,
                &["invalidQuery"],
                "Unrecognized name: connection_count at [1:8]",
            )),
        );
        assert_eq!(err.kind, WarehouseErrorKind::InvalidQuery);
        assert!(err.message.contains("connection_count"));
    }

    #[test]
    fn test_http_error_reason_beats_status() {
        let err = http_error(
            "BigQuery query failed",
            HttpError::Response(response(403, &["rateLimitExceeded"], "Exceeded rate limits")),
        );
        assert_eq!(err.kind, WarehouseErrorKind::Transient);

        let err = http_error(
            "Failed to get table",
            HttpError::Response(response(404, &[], "Not found: Table p:d.timeout_log")),
        );
        assert_eq!(err.kind, WarehouseErrorKind::NotFound);
    }

    #[test]
    fn test_http_error_server_failure_is_transient() {
        let err = http_error(
            "BigQuery query failed",
            HttpError::Response(response(503, &["backendError"], "Backend error")),
        );
        assert!(matches!(err.kind, WarehouseErrorKind::Transient));
    }

    #[test]
    fn test_to_bq_parameter() {
        let param = to_bq_parameter(&QueryParameter::int64("min_id", 5));
        assert_eq!(param.name.as_deref(), Some("min_id"));
        assert_eq!(param.parameter_type.parameter_type, "INT64");
        assert_eq!(param.parameter_value.value.as_deref(), Some("5"));
    }
}
