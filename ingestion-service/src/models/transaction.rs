use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionDirection {
    Income,
    Expense,
}

impl TransactionDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "income" => Self::Income,
            _ => Self::Expense,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// An imported bank transaction. Unique per `(user_id, external_id)`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub account_id: Option<Uuid>,
    pub file_id: Option<Uuid>,
    pub external_id: String,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_date: NaiveDateTime,
    pub merchant: Option<String>,
    pub direction: String,
    pub status: String,
    pub document_number: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub account_number: Option<String>,
    pub payer_name: Option<String>,
    pub payer_tax_id: Option<String>,
    pub payer_account: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_tax_id: Option<String>,
    pub recipient_account: Option<String>,
    pub payment_purpose: Option<String>,
    pub source_file_name: String,
    pub imported_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Transaction {
    pub fn direction(&self) -> TransactionDirection {
        TransactionDirection::from_str(&self.direction)
    }

    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from_str(&self.status)
    }
}
