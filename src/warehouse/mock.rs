use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    BackendMode, DatasetRef, QueryJob, QueryOutcome, ResolvedDataset, ResolvedTable, TableRef,
    WarehouseBackend,
};
use crate::error::{Result, WarehouseError, WarehouseErrorKind};

#[derive(Default)]
struct MockState {
    responses: Vec<(String, QueryOutcome)>,
    failures: VecDeque<WarehouseError>,
    scheduled_failures: Vec<(usize, WarehouseError)>,
    datasets: HashMap<DatasetRef, ResolvedDataset>,
    tables: HashMap<TableRef, ResolvedTable>,
    executed: Vec<QueryJob>,
    attempts: usize,
}

/// In-memory backend. Queries are answered from canned responses keyed by a
/// SQL fragment; `CREATE TABLE` and `DROP TABLE` statements update the
/// registered tables so upload conflict policies behave as they do against
/// the service.
pub struct MockBackend {
    project_id: String,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Answers any query whose SQL contains `sql_fragment` with `outcome`.
    /// Later registrations take precedence.
    pub fn respond_to(&self, sql_fragment: impl Into<String>, outcome: QueryOutcome) {
        self.state
            .lock()
            .responses
            .push((sql_fragment.into(), outcome));
    }

    /// Makes the next query attempt fail with `error`.
    pub fn fail_next(&self, error: WarehouseError) {
        self.state.lock().failures.push_back(error);
    }

    /// Makes query attempt number `attempt` (counting from 1, failed
    /// attempts included) fail with `error`.
    pub fn fail_on_attempt(&self, attempt: usize, error: WarehouseError) {
        self.state.lock().scheduled_failures.push((attempt, error));
    }

    pub fn add_dataset(&self, reference: DatasetRef) {
        let resolved = ResolvedDataset {
            reference: reference.clone(),
            location: Some("EU".to_string()),
        };
        self.state.lock().datasets.insert(reference, resolved);
    }

    pub fn add_table(&self, table: ResolvedTable) {
        let mut state = self.state.lock();
        let dataset = table.reference.dataset_ref();
        state.datasets.entry(dataset.clone()).or_insert(ResolvedDataset {
            reference: dataset,
            location: Some("EU".to_string()),
        });
        state.tables.insert(table.reference.clone(), table);
    }

    pub fn has_table(&self, reference: &TableRef) -> bool {
        self.state.lock().tables.contains_key(reference)
    }

    /// SQL of every successfully executed query, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state
            .lock()
            .executed
            .iter()
            .map(|j| j.sql.clone())
            .collect()
    }

    pub fn executed_jobs(&self) -> Vec<QueryJob> {
        self.state.lock().executed.clone()
    }

    /// Query attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    fn apply_ddl(state: &mut MockState, sql: &str) -> Result<()> {
        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.starts_with("DROP TABLE") {
            return Self::apply_drop(state, sql, upper.contains("IF EXISTS"));
        }
        if !upper.starts_with("CREATE") {
            return Ok(());
        }
        let Some(reference) = statement_table(sql) else {
            return Ok(());
        };

        let exists = state.tables.contains_key(&reference);
        if exists && upper.starts_with("CREATE TABLE ") && !upper.contains("IF NOT EXISTS") {
            return Err(WarehouseError::new(
                WarehouseErrorKind::AlreadyExists,
                format!("Already Exists: Table {}", reference),
            )
            .into());
        }
        if !exists || upper.starts_with("CREATE OR REPLACE") {
            state
                .tables
                .insert(reference.clone(), ResolvedTable::new(reference));
        }
        Ok(())
    }

    fn apply_drop(state: &mut MockState, sql: &str, if_exists: bool) -> Result<()> {
        let Some(reference) = statement_table(sql) else {
            return Ok(());
        };
        if state.tables.remove(&reference).is_none() && !if_exists {
            return Err(WarehouseError::new(
                WarehouseErrorKind::NotFound,
                format!("Not found: Table {}", reference),
            )
            .into());
        }
        Ok(())
    }
}

/// Table named by the first backtick-quoted identifier of a DDL statement.
fn statement_table(sql: &str) -> Option<TableRef> {
    let start = sql.find('`')? + 1;
    let end = start + sql[start..].find('`')?;
    sql[start..end].parse().ok()
}

#[async_trait]
impl WarehouseBackend for MockBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn query(&self, job: &QueryJob) -> Result<QueryOutcome> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if let Some(err) = state.failures.pop_front() {
            return Err(err.into());
        }
        let attempt = state.attempts;
        if let Some(pos) = state
            .scheduled_failures
            .iter()
            .position(|(n, _)| *n == attempt)
        {
            let (_, err) = state.scheduled_failures.swap_remove(pos);
            return Err(err.into());
        }

        Self::apply_ddl(&mut state, &job.sql)?;
        state.executed.push(job.clone());

        let outcome = state
            .responses
            .iter()
            .rev()
            .find(|(fragment, _)| job.sql.contains(fragment.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_default();

        Ok(QueryOutcome {
            job_id: Some(format!("mock_job_{}", state.attempts)),
            ..outcome
        })
    }

    async fn get_dataset(&self, reference: &DatasetRef) -> Result<ResolvedDataset> {
        self.state
            .lock()
            .datasets
            .get(reference)
            .cloned()
            .ok_or_else(|| {
                WarehouseError::new(
                    WarehouseErrorKind::NotFound,
                    format!("Not found: Dataset {}", reference),
                )
                .into()
            })
    }

    async fn get_table(&self, reference: &TableRef) -> Result<ResolvedTable> {
        self.state
            .lock()
            .tables
            .get(reference)
            .cloned()
            .ok_or_else(|| {
                WarehouseError::new(
                    WarehouseErrorKind::NotFound,
                    format!("Not found: Table {}", reference),
                )
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::ColumnInfo;
    use serde_json::json;

    fn orders() -> TableRef {
        TableRef::new("proj", "sales", "orders").unwrap()
    }

    #[tokio::test]
    async fn test_mock_returns_canned_response() {
        let backend = MockBackend::new("proj");
        backend.respond_to(
            "FROM orders",
            QueryOutcome {
                columns: vec![ColumnInfo {
                    name: "n".into(),
                    data_type: "INT64".into(),
                }],
                rows: vec![vec![json!("3")]],
                bytes_billed: 10,
                ..Default::default()
            },
        );

        let outcome = backend
            .query(&QueryJob::new("SELECT COUNT(*) AS n FROM orders"))
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.bytes_billed, 10);
        assert!(outcome.job_id.is_some());

        let other = backend.query(&QueryJob::new("SELECT 1")).await.unwrap();
        assert!(other.rows.is_empty());
        assert_eq!(backend.executed_sql().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_queued_failure_is_consumed_once() {
        let backend = MockBackend::new("proj");
        backend.fail_next(WarehouseError::new(WarehouseErrorKind::Transient, "backendError"));

        let first = backend.query(&QueryJob::new("SELECT 1")).await;
        assert!(first.is_err());
        let second = backend.query(&QueryJob::new("SELECT 1")).await;
        assert!(second.is_ok());
        assert_eq!(backend.attempts(), 2);
        assert_eq!(backend.executed_sql(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_mock_create_table_registers_and_conflicts() {
        let backend = MockBackend::new("proj");
        backend
            .query(&QueryJob::new("CREATE TABLE `proj.sales.orders` (`id` INT64)"))
            .await
            .unwrap();
        assert!(backend.has_table(&orders()));

        let err = backend
            .query(&QueryJob::new("CREATE TABLE `proj.sales.orders` (`id` INT64)"))
            .await
            .unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::AlreadyExists));

        backend
            .query(&QueryJob::new(
                "CREATE TABLE IF NOT EXISTS `proj.sales.orders` (`id` INT64)",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mock_fail_on_attempt() {
        let backend = MockBackend::new("proj");
        backend.fail_on_attempt(2, WarehouseError::new(WarehouseErrorKind::Transient, "boom"));

        assert!(backend.query(&QueryJob::new("SELECT 1")).await.is_ok());
        assert!(backend.query(&QueryJob::new("SELECT 2")).await.is_err());
        assert!(backend.query(&QueryJob::new("SELECT 3")).await.is_ok());
        assert_eq!(backend.executed_sql(), vec!["SELECT 1", "SELECT 3"]);
    }

    #[tokio::test]
    async fn test_mock_drop_table() {
        let backend = MockBackend::new("proj");
        backend.add_table(ResolvedTable::new(orders()));

        backend
            .query(&QueryJob::new("DROP TABLE `proj.sales.orders`"))
            .await
            .unwrap();
        assert!(!backend.has_table(&orders()));

        let err = backend
            .query(&QueryJob::new("DROP TABLE `proj.sales.orders`"))
            .await
            .unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::NotFound));
        backend
            .query(&QueryJob::new("DROP TABLE IF EXISTS `proj.sales.orders`"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mock_lookup_missing_is_not_found() {
        let backend = MockBackend::new("proj");
        let err = backend.get_table(&orders()).await.unwrap_err();
        assert_eq!(err.warehouse_kind(), Some(WarehouseErrorKind::NotFound));

        backend.add_table(ResolvedTable::new(orders()));
        assert!(backend.get_table(&orders()).await.is_ok());
        assert!(backend.get_dataset(&orders().dataset_ref()).await.is_ok());
    }
}
