use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Audit row for one ingestion attempt, written once when the run ends.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UploadedFile {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub account_id: Option<Uuid>,
    pub file_name: String,
    pub format: String,
    pub file_size: i64,
    pub total_transactions: i32,
    pub imported_transactions: i32,
    pub updated_transactions: i32,
    pub skipped_transactions: i32,
    /// Row-level messages joined with `\n`.
    pub errors: Option<String>,
    pub status: String,
    pub uploaded_utc: DateTime<Utc>,
}

impl UploadedFile {
    pub fn status(&self) -> UploadStatus {
        UploadStatus::from_str(&self.status)
    }

    pub fn error_list(&self) -> Vec<String> {
        self.errors
            .as_deref()
            .map(|joined| {
                joined
                    .split('\n')
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn join_errors(errors: &[String]) -> Option<String> {
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_survive_join_and_split() {
        let errors = vec![
            "Failed to process transaction 12: amount is missing".to_string(),
            "Failed to process transaction 13: document date is missing".to_string(),
        ];
        let file = UploadedFile {
            file_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            account_id: None,
            file_name: "statement.csv".into(),
            format: "delimited".into(),
            file_size: 10,
            total_transactions: 2,
            imported_transactions: 0,
            updated_transactions: 0,
            skipped_transactions: 2,
            errors: UploadedFile::join_errors(&errors),
            status: UploadStatus::Completed.as_str().into(),
            uploaded_utc: Utc::now(),
        };

        assert_eq!(file.error_list(), errors);
        assert_eq!(file.status(), UploadStatus::Completed);
    }

    #[test]
    fn no_errors_store_null() {
        assert_eq!(UploadedFile::join_errors(&[]), None);
    }
}
