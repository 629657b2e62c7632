//! Format-independent statement shapes produced by the parsers.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "RUB";

/// One transaction as read from a bank export, before identity or direction
/// is assigned.
///
/// Every parser emits this shape. Fields a format cannot supply stay `None`;
/// a record missing an identity-critical field (amount, date) is still
/// emitted so reconciliation can report it instead of dropping it silently.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatementRecord {
    pub document_number: Option<String>,
    pub document_date: Option<NaiveDate>,
    /// Unsigned magnitude.
    pub amount: Option<Decimal>,
    pub transaction_date: Option<NaiveDateTime>,
    /// The statement's own account number.
    pub account_number: Option<String>,
    pub payer_name: Option<String>,
    pub payer_tax_id: Option<String>,
    pub payer_account: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_tax_id: Option<String>,
    pub recipient_account: Option<String>,
    pub payment_purpose: Option<String>,
    pub currency: String,
}

impl StatementRecord {
    /// Date the record is booked on: document date, else the date part of
    /// the transaction timestamp.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.document_date
            .or_else(|| self.transaction_date.map(|ts| ts.date()))
    }

    /// Transaction timestamp, else midnight of the document date.
    pub fn effective_timestamp(&self) -> Option<NaiveDateTime> {
        self.transaction_date
            .or_else(|| self.document_date.and_then(|d| d.and_hms_opt(0, 0, 0)))
    }

    /// Document number for error messages.
    pub fn display_number(&self) -> &str {
        self.document_number
            .as_deref()
            .unwrap_or("(no document number)")
    }
}

/// Statement-level facts some formats carry in a header block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub client_name: Option<String>,
    pub tax_id: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub currency: Option<String>,
    pub previous_statement_date: Option<NaiveDate>,
    pub statement_date: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
}

impl AccountMetadata {
    pub fn is_empty(&self) -> bool {
        self == &AccountMetadata::default()
    }
}
