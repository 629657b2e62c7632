//! Create-or-update of parsed statement rows against stored transactions.
//!
//! Existing rows are fetched once per run by external id. Each row then runs
//! inside its own savepoint: a row that fails is rolled back and reported,
//! its siblings stay applied. Amount and direction are fixed on creation;
//! later uploads only refresh the narrative and counterparty fields.

use crate::error::{RowError, RowFailure, StoreError};
use crate::models::{StatementRecord, Transaction, TransactionStatus, DEFAULT_CURRENCY};
use crate::services::classify::classify;
use crate::services::identity::assign_identities;
use crate::services::store::IngestionUnit;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Run-wide values stamped onto every reconciled row.
#[derive(Debug, Clone)]
pub struct ReconcileContext<'a> {
    pub user_id: Uuid,
    pub account_id: Option<Uuid>,
    pub file_id: Uuid,
    pub file_name: &'a str,
    /// The statement's own account, used for direction classification.
    pub statement_account: Option<&'a str>,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Created,
    Updated,
    Skipped(String),
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// Outcome counters of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileTally {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl ReconcileTally {
    pub fn fold(self, outcome: RowOutcome) -> Self {
        match outcome {
            RowOutcome::Created => Self {
                created: self.created + 1,
                ..self
            },
            RowOutcome::Updated => Self {
                updated: self.updated + 1,
                ..self
            },
            RowOutcome::Skipped(message) => {
                let mut errors = self.errors;
                errors.push(message);
                Self {
                    skipped: self.skipped + 1,
                    errors,
                    ..self
                }
            }
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

/// Reconciles every record of one statement inside `unit`.
///
/// Row failures are folded into the tally. An `Err` means the unit itself
/// is unusable (lookup or savepoint failure) and the run must be abandoned.
#[instrument(
    skip_all,
    fields(user_id = %ctx.user_id, file_name = %ctx.file_name, rows = records.len())
)]
pub async fn reconcile(
    unit: &mut dyn IngestionUnit,
    ctx: &ReconcileContext<'_>,
    records: &[StatementRecord],
) -> Result<ReconcileTally, StoreError> {
    let identities = assign_identities(ctx.user_id, records);
    let candidates: Vec<String> = identities
        .iter()
        .filter_map(|identity| identity.as_ref().ok().cloned())
        .collect();

    let mut known = unit.find_transactions(ctx.user_id, &candidates).await?;
    tracing::debug!(
        candidates = candidates.len(),
        existing = known.len(),
        "Loaded existing transactions"
    );

    let mut tally = ReconcileTally::default();
    for (record, identity) in records.iter().zip(identities) {
        let outcome = match identity {
            Ok(external_id) => reconcile_row(unit, ctx, record, external_id, &mut known).await?,
            Err(e) => RowOutcome::Skipped(e.to_string()),
        };
        if let RowOutcome::Skipped(message) = &outcome {
            tracing::warn!(
                document_number = %record.display_number(),
                error = %message,
                "Statement row skipped"
            );
        }
        tally = tally.fold(outcome);
    }

    tracing::info!(
        created = tally.created,
        updated = tally.updated,
        skipped = tally.skipped,
        "Statement reconciled"
    );
    Ok(tally)
}

async fn reconcile_row(
    unit: &mut dyn IngestionUnit,
    ctx: &ReconcileContext<'_>,
    record: &StatementRecord,
    external_id: String,
    known: &mut HashMap<String, Transaction>,
) -> Result<RowOutcome, StoreError> {
    unit.begin_row().await?;

    let existing = known.get(&external_id).cloned();
    match write_row(unit, ctx, record, &external_id, existing).await {
        Ok((outcome, stored)) => {
            unit.release_row().await?;
            known.insert(external_id, stored);
            Ok(outcome)
        }
        Err(reason) => {
            unit.rollback_row().await?;
            Ok(RowOutcome::Skipped(
                RowError::new(record.display_number(), reason).to_string(),
            ))
        }
    }
}

async fn write_row(
    unit: &mut dyn IngestionUnit,
    ctx: &ReconcileContext<'_>,
    record: &StatementRecord,
    external_id: &str,
    existing: Option<Transaction>,
) -> Result<(RowOutcome, Transaction), RowFailure> {
    if let Some(existing) = existing {
        let refreshed = refresh_transaction(&existing, ctx, record);
        unit.update_transaction(&refreshed).await?;
        return Ok((RowOutcome::Updated, refreshed));
    }

    let created = new_transaction(ctx, record, external_id)?;
    match unit.insert_transaction(&created).await {
        Ok(()) => Ok((RowOutcome::Created, created)),
        Err(StoreError::UniqueViolation(constraint)) => {
            // Another run stored this identity after the batch lookup.
            tracing::debug!(external_id, "Identity taken concurrently, updating instead");
            let current = unit
                .find_transaction(ctx.user_id, external_id)
                .await?
                .ok_or(StoreError::UniqueViolation(constraint))?;
            let refreshed = refresh_transaction(&current, ctx, record);
            unit.update_transaction(&refreshed).await?;
            Ok((RowOutcome::Updated, refreshed))
        }
        Err(e) => Err(e.into()),
    }
}

fn placeholder_description(record: &StatementRecord) -> String {
    match record.document_number.as_deref() {
        Some(number) => format!("Bank transaction {}", number),
        None => "Bank transaction".to_string(),
    }
}

fn new_transaction(
    ctx: &ReconcileContext<'_>,
    record: &StatementRecord,
    external_id: &str,
) -> Result<Transaction, RowFailure> {
    let amount = record.amount.ok_or(RowFailure::MissingAmount)?;
    let transaction_date = record
        .effective_timestamp()
        .ok_or(RowFailure::MissingDate)?;
    let currency = if record.currency.trim().is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        record.currency.clone()
    };

    Ok(Transaction {
        transaction_id: Uuid::new_v4(),
        user_id: ctx.user_id,
        account_id: ctx.account_id,
        file_id: Some(ctx.file_id),
        external_id: external_id.to_string(),
        description: record
            .payment_purpose
            .clone()
            .unwrap_or_else(|| placeholder_description(record)),
        amount: amount.abs(),
        currency,
        transaction_date,
        merchant: record
            .recipient_name
            .clone()
            .or_else(|| record.payer_name.clone()),
        direction: classify(record, ctx.statement_account).as_str().to_string(),
        status: TransactionStatus::Completed.as_str().to_string(),
        document_number: record.document_number.clone(),
        document_date: record.document_date,
        account_number: record
            .account_number
            .clone()
            .or_else(|| ctx.statement_account.map(str::to_string)),
        payer_name: record.payer_name.clone(),
        payer_tax_id: record.payer_tax_id.clone(),
        payer_account: record.payer_account.clone(),
        recipient_name: record.recipient_name.clone(),
        recipient_tax_id: record.recipient_tax_id.clone(),
        recipient_account: record.recipient_account.clone(),
        payment_purpose: record.payment_purpose.clone(),
        source_file_name: ctx.file_name.to_string(),
        imported_utc: ctx.imported_at,
        created_utc: ctx.imported_at,
        updated_utc: ctx.imported_at,
    })
}

fn refresh_transaction(
    existing: &Transaction,
    ctx: &ReconcileContext<'_>,
    record: &StatementRecord,
) -> Transaction {
    Transaction {
        description: record
            .payment_purpose
            .clone()
            .unwrap_or_else(|| existing.description.clone()),
        merchant: record
            .recipient_name
            .clone()
            .or_else(|| record.payer_name.clone())
            .or_else(|| existing.merchant.clone()),
        account_id: ctx.account_id.or(existing.account_id),
        file_id: Some(ctx.file_id),
        account_number: record
            .account_number
            .clone()
            .or_else(|| ctx.statement_account.map(str::to_string))
            .or_else(|| existing.account_number.clone()),
        payer_name: record.payer_name.clone(),
        payer_tax_id: record.payer_tax_id.clone(),
        payer_account: record.payer_account.clone(),
        recipient_name: record.recipient_name.clone(),
        recipient_tax_id: record.recipient_tax_id.clone(),
        recipient_account: record.recipient_account.clone(),
        payment_purpose: record.payment_purpose.clone(),
        source_file_name: ctx.file_name.to_string(),
        imported_utc: ctx.imported_at,
        updated_utc: ctx.imported_at,
        ..existing.clone()
    }
}
