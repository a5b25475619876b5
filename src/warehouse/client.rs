use std::time::{Duration, Instant};

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::converters::outcome_to_batch;
use super::sql_builder::{
    build_drop_table_sql, build_ensure_table_sql, build_insert_statements, build_publish_sql,
    build_staging_table_sql, MAX_STATEMENT_BYTES,
};
use super::{
    BackendMode, BigQueryBackend, DatasetRef, IfExists, QueryJob, QueryOutcome, QueryParameter,
    ResolvedDataset, ResolvedTable, TableRef, WarehouseBackend,
};
use crate::config::WarehouseConfig;
use crate::error::{Result, WarehouseError, WarehouseErrorKind};
use crate::metrics;
use crate::retry::{retry_with_deadline, RetryPolicy};

const BYTES_PER_TIB: f64 = (1u64 << 40) as f64;

/// Estimated price of a query: billed bytes in TiB times the unit price.
pub fn estimate_cost(bytes_billed: u64, price_per_tib: f64) -> f64 {
    bytes_billed as f64 / BYTES_PER_TIB * price_per_tib
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCost {
    pub bytes_billed: u64,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub outcome: QueryOutcome,
    pub cost: QueryCost,
}

/// Sibling of `table` that receives rows before they are published.
fn staging_table(table: &TableRef) -> Result<TableRef> {
    let suffix = Uuid::new_v4().simple().to_string();
    table
        .dataset_ref()
        .table(format!("{}_staging_{}", table.table, &suffix[..12]))
}

/// Runs queries and uploads against one backend session.
pub struct WarehouseClient<B = BigQueryBackend> {
    backend: B,
    config: WarehouseConfig,
    retry_policy: RetryPolicy,
}

impl WarehouseClient<BigQueryBackend> {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        let backend = BigQueryBackend::connect(config.project_id.as_deref()).await?;
        Ok(Self::with_backend(backend, config.clone()))
    }
}

impl<B: WarehouseBackend> WarehouseClient<B> {
    pub fn with_backend(backend: B, config: WarehouseConfig) -> Self {
        let retry_policy =
            RetryPolicy::with_deadline(Duration::from_secs(config.query_timeout_secs));
        Self {
            backend,
            config,
            retry_policy,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn project_id(&self) -> &str {
        self.backend.project_id()
    }

    /// Submits `sql`, retrying transient failures until the configured
    /// query timeout, and logs processed bytes and estimated cost.
    pub async fn execute(&self, sql: &str, params: &[QueryParameter]) -> Result<QueryExecution> {
        self.submit(sql, params, true).await
    }

    /// Like [`execute`](Self::execute) but materialises the result only
    /// when `return_table` is set.
    pub async fn run_query(
        &self,
        sql: &str,
        params: &[QueryParameter],
        return_table: bool,
    ) -> Result<Option<RecordBatch>> {
        let execution = self.execute(sql, params).await?;
        if !return_table {
            return Ok(None);
        }
        let batch = outcome_to_batch(&execution.outcome).inspect_err(|e| {
            error!(error = %e, "Failed to convert query result");
        })?;
        Ok(Some(batch))
    }

    async fn submit(
        &self,
        sql: &str,
        params: &[QueryParameter],
        retry: bool,
    ) -> Result<QueryExecution> {
        info!(sql = %sql, "Running query");
        let start = Instant::now();
        let job = QueryJob::new(sql)
            .with_parameters(params.to_vec())
            .with_timeout(Duration::from_secs(self.config.query_timeout_secs));

        let result = if retry {
            retry_with_deadline(&self.retry_policy, || self.backend.query(&job)).await
        } else {
            self.backend.query(&job).await
        };
        metrics::record_query_duration(start);

        let outcome = result.inspect_err(|e| {
            let kind = e.warehouse_kind().unwrap_or(WarehouseErrorKind::Other);
            metrics::record_query_error(kind);
            error!(kind = %kind, error = %e, "BigQuery client error");
        })?;

        let cost = QueryCost {
            bytes_billed: outcome.bytes_billed,
            amount: estimate_cost(outcome.bytes_billed, self.config.price_per_tib),
            currency: self.config.currency.clone(),
        };
        metrics::record_query_executed(outcome.bytes_processed, outcome.bytes_billed);
        metrics::record_query_cost(cost.amount);

        info!(
            job_id = outcome.job_id.as_deref().unwrap_or_default(),
            bytes_processed = outcome.bytes_processed,
            cache_hit = outcome.cache_hit,
            "The query processed {} bytes",
            outcome.bytes_processed
        );
        info!(
            cost = cost.amount,
            currency = %cost.currency,
            "The query cost {:.6} {}",
            cost.amount,
            cost.currency
        );

        Ok(QueryExecution { outcome, cost })
    }

    /// Writes `batch` to `destination` (`dataset.table`, or fully qualified)
    /// in `project_id`. Returns the number of rows written.
    ///
    /// Rows are first inserted into an expiring staging table next to the
    /// destination. One final statement then moves them into place, so a
    /// failed insert leaves the destination as it was.
    pub async fn upload_table(
        &self,
        batch: &RecordBatch,
        destination: &str,
        project_id: &str,
        if_exists: IfExists,
    ) -> Result<u64> {
        let table = TableRef::parse_with_default(destination, project_id)?;

        if if_exists == IfExists::Fail {
            match self.backend.get_table(&table).await {
                Ok(_) => {
                    let err = WarehouseError::new(
                        WarehouseErrorKind::AlreadyExists,
                        format!("Table {} already exists", table),
                    );
                    error!(table = %table, "BigQuery client error: {}", err);
                    return Err(err.into());
                }
                Err(e) if e.warehouse_kind() == Some(WarehouseErrorKind::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let schema = batch.schema_ref();
        let staging = staging_table(&table)?;
        let staging_ddl = build_staging_table_sql(&staging, schema)?;
        let statements = build_insert_statements(
            &staging,
            batch,
            self.config.insert_batch_size,
            MAX_STATEMENT_BYTES,
        )?;
        self.submit(&staging_ddl, &[], false).await?;
        debug!(
            table = %table,
            staging = %staging,
            statements = statements.len(),
            "Staging rows"
        );

        let loaded = self
            .publish(&table, &staging, schema, &statements, if_exists)
            .await;
        let cleanup = self.submit(&build_drop_table_sql(&staging), &[], false).await;
        if let Err(e) = cleanup {
            warn!(staging = %staging, error = %e, "Failed to drop staging table");
        }
        loaded?;

        let rows = batch.num_rows() as u64;
        metrics::record_table_uploaded(rows);
        info!(table = %table, rows = rows, if_exists = ?if_exists, "Table uploaded");
        Ok(rows)
    }

    async fn publish(
        &self,
        table: &TableRef,
        staging: &TableRef,
        schema: &Schema,
        inserts: &[String],
        if_exists: IfExists,
    ) -> Result<()> {
        for statement in inserts {
            self.submit(statement, &[], false).await?;
        }
        if if_exists == IfExists::Append {
            let ddl = build_ensure_table_sql(table, schema)?;
            self.submit(&ddl, &[], false).await?;
        }
        let column_names: Vec<String> =
            schema.fields().iter().map(|f| f.name().clone()).collect();
        let publish = build_publish_sql(table, staging, &column_names, if_exists);
        self.submit(&publish, &[], false).await?;
        Ok(())
    }

    /// Resolves a dataset, failing with `NotFound` when it does not exist.
    pub async fn dataset(&self, name: &str, project: Option<&str>) -> Result<ResolvedDataset> {
        let reference = DatasetRef::new(project.unwrap_or(self.project_id()), name)?;
        let resolved = self.backend.get_dataset(&reference).await.inspect_err(|e| {
            error!(dataset = %reference, error = %e, "Failed to resolve dataset");
        })?;
        debug!(dataset = %reference, "Dataset resolved");
        Ok(resolved)
    }

    /// Resolves `project.dataset.table` (or `dataset.table` in the client's
    /// project), failing with `NotFound` when it does not exist.
    pub async fn table(&self, qualified_name: &str) -> Result<ResolvedTable> {
        let reference = TableRef::parse_with_default(qualified_name, self.project_id())?;
        let resolved = self.backend.get_table(&reference).await.inspect_err(|e| {
            error!(table = %reference, error = %e, "Failed to resolve table");
        })?;
        debug!(table = %reference, "Table resolved");
        Ok(resolved)
    }
}

impl<B> std::fmt::Debug for WarehouseClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_io::test_support::sample_batch;
    use crate::warehouse::{ColumnInfo, MockBackend};
    use arrow::array::AsArray;
    use arrow::datatypes::Int64Type;
    use serde_json::json;

    fn client() -> WarehouseClient<MockBackend> {
        let config = WarehouseConfig {
            project_id: Some("proj".into()),
            insert_batch_size: 2,
            ..Default::default()
        };
        WarehouseClient::with_backend(MockBackend::new("proj"), config).with_retry_policy(
            RetryPolicy {
                deadline: Duration::from_millis(200),
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
        )
    }

    fn orders() -> TableRef {
        TableRef::new("proj", "sales", "orders").unwrap()
    }

    #[test]
    fn test_estimate_cost() {
        assert_eq!(estimate_cost(0, 6.0), 0.0);
        assert_eq!(estimate_cost(1 << 40, 6.0), 6.0);
        assert!((estimate_cost(1 << 39, 6.0) - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_execute_reports_cost() {
        let client = client();
        client.backend().respond_to(
            "SELECT",
            QueryOutcome {
                bytes_processed: 1 << 30,
                bytes_billed: 1 << 40,
                ..Default::default()
            },
        );

        let execution = client.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(execution.cost.amount, 6.0);
        assert_eq!(execution.cost.currency, "EUR");
        assert_eq!(execution.outcome.bytes_processed, 1 << 30);
    }

    #[tokio::test]
    async fn test_run_query_returns_table_only_when_requested() {
        let client = client();
        client.backend().respond_to(
            "FROM orders",
            QueryOutcome {
                columns: vec![ColumnInfo {
                    name: "id".into(),
                    data_type: "INT64".into(),
                }],
                rows: vec![vec![json!("1")], vec![json!("2")]],
                ..Default::default()
            },
        );

        let none = client.run_query("SELECT id FROM orders", &[], false).await.unwrap();
        assert!(none.is_none());

        let batch = client
            .run_query("SELECT id FROM orders", &[], true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column(0).as_primitive::<Int64Type>().value(1), 2);
    }

    #[tokio::test]
    async fn test_run_query_passes_parameters() {
        let client = client();
        let params = vec![QueryParameter::int64("min_id", 3)];
        client
            .run_query("SELECT * FROM t WHERE id > @min_id", &params, false)
            .await
            .unwrap();

        let jobs = client.backend().executed_jobs();
        assert_eq!(jobs[0].parameters, params);
        assert_eq!(jobs[0].timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_run_query_retries_transient_errors() {
        let client = client();
        client
            .backend()
            .fail_next(WarehouseError::new(WarehouseErrorKind::Transient, "backendError"));

        client.run_query("SELECT 1", &[], false).await.unwrap();
        assert_eq!(client.backend().attempts(), 2);
    }

    #[tokio::test]
    async fn test_run_query_keeps_error_kind_and_message() {
        let client = client();
        client.backend().fail_next(WarehouseError::new(
            WarehouseErrorKind::InvalidQuery,
            "Syntax error: Unexpected keyword FORM",
        ));

        let err = client.run_query("SELECT * FORM t", &[], false).await.unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::InvalidQuery));
        assert!(err.to_string().contains("Unexpected keyword FORM"));
        assert_eq!(client.backend().attempts(), 1);
    }

    fn backticked(sql: &str) -> TableRef {
        let start = sql.find('`').unwrap() + 1;
        let end = start + sql[start..].find('`').unwrap();
        sql[start..end].parse().unwrap()
    }

    #[tokio::test]
    async fn test_upload_replace_stages_then_swaps() {
        let client = client();
        let rows = client
            .upload_table(&sample_batch(), "sales.orders", "proj", IfExists::Replace)
            .await
            .unwrap();
        assert_eq!(rows, 3);

        let sql = client.backend().executed_sql();
        assert_eq!(sql.len(), 5);
        let staging = backticked(&sql[0]);
        assert!(staging.table.starts_with("orders_staging_"));
        assert_eq!(staging.dataset_ref(), orders().dataset_ref());
        assert!(sql[0].starts_with(&format!("CREATE TABLE {}", staging.sql_identifier())));
        assert!(sql[0].contains("expiration_timestamp"));
        assert!(sql[1].starts_with(&format!("INSERT INTO {}", staging.sql_identifier())));
        assert!(sql[2].ends_with("(3, 'carol', 3.75, true)"));
        assert_eq!(
            sql[3],
            format!(
                "CREATE OR REPLACE TABLE `proj.sales.orders` AS SELECT `id`, `name`, `score`, `active` FROM {}",
                staging.sql_identifier()
            )
        );
        assert_eq!(sql[4], format!("DROP TABLE IF EXISTS {}", staging.sql_identifier()));

        assert!(client.backend().has_table(&orders()));
        assert!(!client.backend().has_table(&staging));
    }

    #[tokio::test]
    async fn test_upload_replace_failure_keeps_existing_table() {
        let client = client();
        let mut existing = ResolvedTable::new(orders());
        existing.num_rows = Some(10);
        client.backend().add_table(existing);
        client
            .backend()
            .fail_on_attempt(3, WarehouseError::new(WarehouseErrorKind::Transient, "backendError"));

        let err = client
            .upload_table(&sample_batch(), "sales.orders", "proj", IfExists::Replace)
            .await
            .unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::Transient));

        let table = client.backend().get_table(&orders()).await.unwrap();
        assert_eq!(table.num_rows, Some(10));

        let sql = client.backend().executed_sql();
        assert!(sql.iter().all(|s| !s.contains("`proj.sales.orders` AS")));
        let staging = backticked(&sql[0]);
        assert_eq!(
            sql.last().unwrap(),
            &format!("DROP TABLE IF EXISTS {}", staging.sql_identifier())
        );
        assert!(!client.backend().has_table(&staging));
    }

    #[tokio::test]
    async fn test_upload_fail_rejects_existing_table() {
        let client = client();
        client.backend().add_table(ResolvedTable::new(orders()));

        let err = client
            .upload_table(&sample_batch(), "sales.orders", "proj", IfExists::Fail)
            .await
            .unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::AlreadyExists));
        assert!(client.backend().executed_sql().is_empty());
    }

    #[tokio::test]
    async fn test_upload_fail_creates_missing_table() {
        let client = client();
        client
            .upload_table(&sample_batch(), "sales.orders", "proj", IfExists::Fail)
            .await
            .unwrap();
        let sql = client.backend().executed_sql();
        assert!(sql[3].starts_with("CREATE TABLE `proj.sales.orders` AS SELECT"));
        assert!(client.backend().has_table(&orders()));
    }

    #[tokio::test]
    async fn test_upload_append_keeps_existing_table() {
        let client = client();
        client.backend().add_table(ResolvedTable::new(orders()));

        client
            .upload_table(&sample_batch(), "proj.sales.orders", "other", IfExists::Append)
            .await
            .unwrap();
        let sql = client.backend().executed_sql();
        assert!(sql[3].starts_with("CREATE TABLE IF NOT EXISTS `proj.sales.orders`"));
        assert!(sql[4].starts_with("INSERT INTO `proj.sales.orders` (`id`, `name`, `score`, `active`) SELECT"));
    }

    #[tokio::test]
    async fn test_upload_is_not_retried() {
        let client = client();
        client
            .backend()
            .fail_next(WarehouseError::new(WarehouseErrorKind::Transient, "backendError"));

        let err = client
            .upload_table(&sample_batch(), "sales.orders", "proj", IfExists::Replace)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.backend().attempts(), 1);
    }

    #[tokio::test]
    async fn test_dataset_and_table_factories() {
        let client = client();
        client.backend().add_table(ResolvedTable::new(orders()));

        let dataset = client.dataset("sales", None).await.unwrap();
        assert_eq!(dataset.reference.project, "proj");

        let table = client.table("proj.sales.orders").await.unwrap();
        assert_eq!(table.reference, orders());

        let missing = client.table("proj.sales.refunds").await.unwrap_err();
        assert_eq!(missing.warehouse_kind(), Some(WarehouseErrorKind::NotFound));

        let missing_ds = client.dataset("hr", Some("proj")).await.unwrap_err();
        assert_eq!(missing_ds.warehouse_kind(), Some(WarehouseErrorKind::NotFound));
    }
}
