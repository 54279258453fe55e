use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AskJsonError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// the llm call itself failed; never retried
    #[error("llm transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("invalid row mapping: {0}")]
    Mapping(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("{}", budget_message(*attempts, last_sql.as_deref(), last_error))]
    BudgetExceeded {
        attempts: usize,
        last_sql: Option<String>,
        last_error: AttemptError,
    },

    #[error("tracing initialization failed: {0}")]
    Tracing(String),
}

pub type Result<T> = std::result::Result<T, AskJsonError>;

fn budget_message(attempts: usize, last_sql: Option<&str>, last_error: &AttemptError) -> String {
    match last_sql {
        Some(sql) => format!(
            "gave up after {} attempts: {}\nlast sql: {}",
            attempts, last_error, sql
        ),
        None => format!("gave up after {} attempts: {}", attempts, last_error),
    }
}

/// model output that could not be turned into a query
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("model output did not contain a ```sql fenced block")]
    NoSqlBlock,

    #[error("model output contained an empty ```sql fenced block")]
    EmptySqlBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    Syntax,
    UnknownColumn,
    UnknownTable,
    /// rejected before reaching the engine, or flagged as writing by it
    Unsafe,
    Engine,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::Syntax => "syntax",
            ExecutionErrorKind::UnknownColumn => "unknown column",
            ExecutionErrorKind::UnknownTable => "unknown table",
            ExecutionErrorKind::Unsafe => "unsafe statement",
            ExecutionErrorKind::Engine => "engine",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// sql rejected by the safety check or failed inside the engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    /// raw engine message, fed back to the model unchanged
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsafe_statement(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Unsafe, message)
    }
}

/// a retryable failure of one query-synthesis attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display_keeps_engine_message() {
        let err = ExecutionError::new(ExecutionErrorKind::UnknownColumn, "no such column: arrival");
        assert_eq!(err.to_string(), "unknown column error: no such column: arrival");
    }

    #[test]
    fn test_budget_exceeded_mentions_sql_and_attempts() {
        let err = AskJsonError::BudgetExceeded {
            attempts: 2,
            last_sql: Some("SELECT nope FROM flights".to_string()),
            last_error: AttemptError::Execution(ExecutionError::new(
                ExecutionErrorKind::UnknownColumn,
                "no such column: nope",
            )),
        };

        let text = err.to_string();
        assert!(text.contains("2 attempts"));
        assert!(text.contains("no such column: nope"));
        assert!(text.contains("SELECT nope FROM flights"));
    }

    #[test]
    fn test_budget_exceeded_without_sql() {
        let err = AskJsonError::BudgetExceeded {
            attempts: 1,
            last_sql: None,
            last_error: AttemptError::Extraction(ExtractionError::NoSqlBlock),
        };

        assert!(!err.to_string().contains("last sql"));
    }
}
