use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported file extension '.{extension}', supported: {supported}")]
    UnsupportedFormat { extension: String, supported: String },

    #[error("Unsupported plot extension '{extension}', supported: {supported}")]
    UnsupportedPlotFormat { extension: String, supported: String },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn warehouse_kind(&self) -> Option<WarehouseErrorKind> {
        match self {
            Error::Warehouse(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.warehouse_kind() == Some(WarehouseErrorKind::Transient)
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Format(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Format(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WarehouseErrorKind {
    InvalidQuery,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    DeadlineExceeded,
    Transient,
    Other,
}

impl WarehouseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseErrorKind::InvalidQuery => "invalid_query",
            WarehouseErrorKind::NotFound => "not_found",
            WarehouseErrorKind::PermissionDenied => "permission_denied",
            WarehouseErrorKind::AlreadyExists => "already_exists",
            WarehouseErrorKind::DeadlineExceeded => "deadline_exceeded",
            WarehouseErrorKind::Transient => "transient",
            WarehouseErrorKind::Other => "other",
        }
    }

    /// Kind for one of BigQuery's typed `errors[].reason` codes.
    pub fn from_reason(reason: &str) -> Option<Self> {
        let kind = match reason {
            "invalidQuery" | "invalid" | "notImplemented" => WarehouseErrorKind::InvalidQuery,
            "notFound" => WarehouseErrorKind::NotFound,
            "accessDenied" | "billingNotEnabled" | "blocked" | "invalidUser" => {
                WarehouseErrorKind::PermissionDenied
            }
            "duplicate" => WarehouseErrorKind::AlreadyExists,
            "timeout" => WarehouseErrorKind::DeadlineExceeded,
            "backendError" | "internalError" | "jobBackendError" | "jobInternalError"
            | "rateLimitExceeded" | "quotaExceeded" | "tableUnavailable" => {
                WarehouseErrorKind::Transient
            }
            _ => return None,
        };
        Some(kind)
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            400 => WarehouseErrorKind::InvalidQuery,
            401 | 403 => WarehouseErrorKind::PermissionDenied,
            404 => WarehouseErrorKind::NotFound,
            409 => WarehouseErrorKind::AlreadyExists,
            408 | 504 => WarehouseErrorKind::DeadlineExceeded,
            429 | 500 | 502 | 503 => WarehouseErrorKind::Transient,
            _ => WarehouseErrorKind::Other,
        }
    }

    /// Kind for a structured error response. The first known reason wins
    /// over the status, which is shared by unrelated reasons (BigQuery
    /// reports rate limits as 403).
    pub fn from_response<'a>(code: u16, reasons: impl IntoIterator<Item = &'a str>) -> Self {
        reasons
            .into_iter()
            .find_map(Self::from_reason)
            .unwrap_or_else(|| Self::from_status(code))
    }

    /// Maps an error message onto a kind when no structured response is
    /// available. Embedded reason tokens and status codes are trusted
    /// first; the remaining phrases only match whole words, so column names
    /// quoted in the message such as `connection_count` do not count.
    pub fn classify(message: &str) -> Self {
        if let Some(kind) = REASON_REGEX
            .captures_iter(message)
            .find_map(|c| Self::from_reason(&c[1]))
        {
            return kind;
        }
        if let Some(code) = STATUS_REGEX
            .captures(message)
            .and_then(|c| c[1].parse::<u16>().ok())
        {
            let kind = Self::from_status(code);
            if kind != WarehouseErrorKind::Other {
                return kind;
            }
        }
        MESSAGE_PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, kind)| *kind)
            .unwrap_or(WarehouseErrorKind::Other)
    }
}

static REASON_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"reason"?\s*[:=]\s*"?([A-Za-z]+)"#).expect("REASON_REGEX pattern is valid")
});

static STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:code|status)\s*[:=]\s*(\d{3})\b").expect("STATUS_REGEX pattern is valid")
});

/// Checked in order; query errors come first because their messages quote
/// user identifiers that may contain any of the later words.
static MESSAGE_PATTERNS: LazyLock<Vec<(Regex, WarehouseErrorKind)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\b(?:syntax error|unrecognized name|invalid query|no matching signature|function not found)\b",
            WarehouseErrorKind::InvalidQuery,
        ),
        (r"(?i)\bnot found\b", WarehouseErrorKind::NotFound),
        (
            r"(?i)\b(?:access denied|permission denied|does not have permission|unauthorized|unauthenticated)\b",
            WarehouseErrorKind::PermissionDenied,
        ),
        (r"(?i)\balready exists\b", WarehouseErrorKind::AlreadyExists),
        (
            r"(?i)\b(?:timed out|deadline exceeded)\b",
            WarehouseErrorKind::DeadlineExceeded,
        ),
        (
            r"(?i)\b(?:error trying to connect|connection (?:reset|refused|closed|aborted)|service unavailable|temporarily unavailable|internal error|backend error)\b",
            WarehouseErrorKind::Transient,
        ),
        (r"(?i)\binvalid\b", WarehouseErrorKind::InvalidQuery),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        (
            Regex::new(pattern).expect("message pattern is valid"),
            kind,
        )
    })
    .collect()
});

impl fmt::Display for WarehouseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("BigQuery error ({kind}): {message}")]
pub struct WarehouseError {
    pub kind: WarehouseErrorKind,
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl WarehouseError {
    pub fn new(kind: WarehouseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a client library error, deriving the kind from its message.
    pub fn from_source<E>(context: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let detail = source.to_string();
        Self {
            kind: WarehouseErrorKind::classify(&detail),
            message: format!("{}: {}", context, detail),
            source: Some(Box::new(source)),
        }
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_kind(mut self, kind: WarehouseErrorKind) -> Self {
        self.kind = kind;
        self
    }
}
