//! Error types for the ingestion pipeline.
//!
//! Domain errors stay typed until they reach the HTTP boundary, where they
//! are converted into [`AppError`].

use service_core::error::AppError;
use thiserror::Error;

/// A parser could not read the file at all.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("failed to read statement: {}", e))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::UniqueViolation(db.message().to_string())
            }
            _ => Self::Database(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::DatabaseError(anyhow::anyhow!(e))
    }
}

/// Why a single statement row was skipped.
#[derive(Debug, Error)]
pub enum RowFailure {
    #[error("amount is missing or unreadable")]
    MissingAmount,

    #[error("transaction date is missing or unreadable")]
    MissingDate,

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// A row-level failure, located by document number.
#[derive(Debug, Error)]
#[error("Failed to process transaction {document_number}: {reason}")]
pub struct RowError {
    pub document_number: String,
    pub reason: RowFailure,
}

impl RowError {
    pub fn new(document_number: impl Into<String>, reason: RowFailure) -> Self {
        Self {
            document_number: document_number.into(),
            reason,
        }
    }
}

/// Failures that abort a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Unsupported file format: {file_name}")]
    UnsupportedFormat { file_name: String },

    #[error("Failed to parse {file_name}: {message}")]
    Parse { file_name: String, message: String },

    #[error("No transactions found in {file_name}")]
    EmptyStatement { file_name: String },

    #[error("Failed to store statement: {0}")]
    Store(#[from] StoreError),
}

impl IngestionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyUpload => "empty_upload",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Parse { .. } => "parse_error",
            Self::EmptyStatement { .. } => "empty_statement",
            Self::Store(_) => "store_error",
        }
    }
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Store(store) => store.into(),
            other => AppError::BadRequest(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_error_names_document() {
        let err = RowError::new("1042", RowFailure::MissingAmount);
        assert_eq!(
            err.to_string(),
            "Failed to process transaction 1042: amount is missing or unreadable"
        );
    }

    #[test]
    fn whole_run_failures_are_bad_requests() {
        let app: AppError = IngestionError::UnsupportedFormat {
            file_name: "notes.pdf".into(),
        }
        .into();
        assert!(matches!(app, AppError::BadRequest(_)));
        assert!(app.to_string().contains("notes.pdf"));
    }

    #[test]
    fn store_failures_are_database_errors() {
        let app: AppError = IngestionError::Store(StoreError::UniqueViolation("dup".into())).into();
        assert!(matches!(app, AppError::DatabaseError(_)));
    }
}
