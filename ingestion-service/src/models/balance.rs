use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Closing balance of one account on one date. Never updated in place.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AccountBalance {
    pub balance_id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub balance_date: NaiveDate,
    pub balance: Decimal,
    pub currency: String,
    pub file_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}
