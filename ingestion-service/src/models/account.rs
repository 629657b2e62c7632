use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use super::statement::{AccountMetadata, DEFAULT_CURRENCY};

/// A statement account, unique per `(user_id, account_number)`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub account_number: String,
    pub client_name: Option<String>,
    pub tax_id: Option<String>,
    pub account_name: Option<String>,
    pub currency: String,
    pub last_statement_date: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Descriptive facts about an account taken from a statement header.
///
/// Absent fields leave the stored value as it is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountRegistration {
    pub account_number: String,
    pub client_name: Option<String>,
    pub tax_id: Option<String>,
    pub account_name: Option<String>,
    pub currency: Option<String>,
    pub last_statement_date: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
}

impl AccountRegistration {
    pub fn from_metadata(account_number: String, metadata: Option<&AccountMetadata>) -> Self {
        match metadata {
            Some(m) => Self {
                account_number,
                client_name: m.client_name.clone(),
                tax_id: m.tax_id.clone(),
                account_name: m.account_name.clone(),
                currency: m.currency.clone(),
                last_statement_date: m.previous_statement_date,
                opening_balance: m.opening_balance,
            },
            None => Self {
                account_number,
                ..Self::default()
            },
        }
    }

    /// Row for a first registration.
    pub fn into_new_account(self, user_id: Uuid, now: DateTime<Utc>) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id,
            account_number: self.account_number,
            client_name: self.client_name,
            tax_id: self.tax_id,
            account_name: self.account_name,
            currency: self
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            last_statement_date: self.last_statement_date,
            opening_balance: self.opening_balance,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Overlays the present fields on an existing row.
    pub fn apply_to(&self, existing: &Account, now: DateTime<Utc>) -> Account {
        Account {
            client_name: self.client_name.clone().or_else(|| existing.client_name.clone()),
            tax_id: self.tax_id.clone().or_else(|| existing.tax_id.clone()),
            account_name: self
                .account_name
                .clone()
                .or_else(|| existing.account_name.clone()),
            currency: self
                .currency
                .clone()
                .unwrap_or_else(|| existing.currency.clone()),
            last_statement_date: self.last_statement_date.or(existing.last_statement_date),
            opening_balance: self.opening_balance.or(existing.opening_balance),
            updated_utc: now,
            ..existing.clone()
        }
    }
}
