use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::ColumnInfo;
use crate::error::{Error, Result};

static PROJECT_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-]*$")
        .expect("PROJECT_ID_REGEX pattern is valid")
});

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_\-]*$").expect("NAME_REGEX pattern is valid")
});

fn validate_project(project: &str) -> Result<()> {
    if project.is_empty() || project.len() > 128 || !PROJECT_ID_REGEX.is_match(project) {
        return Err(Error::InvalidArgument(format!("Invalid project id: {}", project)));
    }
    Ok(())
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.len() > 1024 || !NAME_REGEX.is_match(name) {
        return Err(Error::InvalidArgument(format!("Invalid {} name: {}", kind, name)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Result<Self> {
        let reference = Self {
            project: project.into(),
            dataset: dataset.into(),
        };
        validate_project(&reference.project)?;
        validate_name("dataset", &reference.dataset)?;
        Ok(reference)
    }

    pub fn table(&self, table: impl Into<String>) -> Result<TableRef> {
        TableRef::new(self.project.clone(), self.dataset.clone(), table)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let reference = Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        };
        validate_project(&reference.project)?;
        validate_name("dataset", &reference.dataset)?;
        validate_name("table", &reference.table)?;
        Ok(reference)
    }

    /// Parses `dataset.table`, filling in `default_project`, or a fully
    /// qualified `project.dataset.table`.
    pub fn parse_with_default(name: &str, default_project: &str) -> Result<Self> {
        let parts: Vec<&str> = name.trim().trim_matches('`').split('.').collect();
        match parts.as_slice() {
            [dataset, table] => Self::new(default_project, *dataset, *table),
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => Err(Error::InvalidArgument(format!(
                "Expected 'dataset.table' or 'project.dataset.table', got '{}'",
                name
            ))),
        }
    }

    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
        }
    }

    /// Backtick-quoted form for use in SQL text.
    pub fn sql_identifier(&self) -> String {
        format!("`{}`", quote_identifier(&self.to_string()))
    }
}

impl FromStr for TableRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().trim_matches('`').split('.').collect();
        match parts.as_slice() {
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => Err(Error::InvalidArgument(format!(
                "Expected 'project.dataset.table', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

pub fn quote_identifier(name: &str) -> String {
    name.replace('`', "``")
}

/// A dataset confirmed to exist on the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDataset {
    pub reference: DatasetRef,
    pub location: Option<String>,
}

/// A table confirmed to exist on the service, with its schema as reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTable {
    pub reference: TableRef,
    pub columns: Vec<ColumnInfo>,
    pub num_rows: Option<u64>,
}

impl ResolvedTable {
    pub fn new(reference: TableRef) -> Self {
        Self {
            reference,
            columns: Vec::new(),
            num_rows: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fully_qualified_table() {
        let table: TableRef = "my-project.sales.orders".parse().unwrap();
        assert_eq!(table.project, "my-project");
        assert_eq!(table.dataset, "sales");
        assert_eq!(table.table, "orders");
        assert_eq!(table.to_string(), "my-project.sales.orders");
    }

    #[test]
    fn test_parse_requires_three_parts() {
        assert!("sales.orders".parse::<TableRef>().is_err());
        assert!("a.b.c.d".parse::<TableRef>().is_err());
    }

    #[test]
    fn test_parse_with_default_project() {
        let table = TableRef::parse_with_default("sales.orders", "my-project").unwrap();
        assert_eq!(table.to_string(), "my-project.sales.orders");

        let explicit = TableRef::parse_with_default("other-proj.sales.orders", "my-project").unwrap();
        assert_eq!(explicit.project, "other-proj");
    }

    #[test]
    fn test_rejects_invalid_names() {
        assert!(TableRef::new("proj", "sales", "orders; DROP TABLE x").is_err());
        assert!(TableRef::new("proj", "1sales", "orders").is_err());
        assert!(DatasetRef::new("", "sales").is_err());
    }

    #[test]
    fn test_sql_identifier_is_backtick_quoted() {
        let table = TableRef::new("proj", "sales", "orders").unwrap();
        assert_eq!(table.sql_identifier(), "`proj.sales.orders`");
    }

    #[test]
    fn test_quote_identifier_doubles_backticks() {
        assert_eq!(quote_identifier("my`table"), "my``table");
    }

    #[test]
    fn test_dataset_ref_table() {
        let dataset = DatasetRef::new("proj", "sales").unwrap();
        let table = dataset.table("orders").unwrap();
        assert_eq!(table.dataset_ref(), dataset);
    }
}
