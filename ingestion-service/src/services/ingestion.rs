//! Drives one statement upload from raw bytes to a stored summary.

use crate::error::{IngestionError, StoreError};
use crate::models::{
    AccountBalance, AccountMetadata, AccountRegistration, StatementRecord, UploadStatus,
    UploadedFile,
};
use crate::parsers::{ParseResult, ParserRegistry, StatementFormat, UNKNOWN_FORMAT};
use crate::services::metrics::{record_error, record_reconciled_rows, record_statement_upload};
use crate::services::reconciliation::{reconcile, ReconcileContext, ReconcileTally};
use crate::services::store::{IngestionUnit, LedgerStore};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Lifecycle of one upload. `Failed` is reachable from `FormatSelected`
/// and `Parsed`; everything else ends in `Summarized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Received,
    FormatSelected,
    Parsed,
    Reconciling,
    Summarized,
    Failed,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::FormatSelected => "format_selected",
            Self::Parsed => "parsed",
            Self::Reconciling => "reconciling",
            Self::Summarized => "summarized",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub file_id: Uuid,
    pub file_name: String,
    pub format: String,
    pub account_id: Option<Uuid>,
    pub total_transactions: usize,
    pub imported_transactions: usize,
    pub updated_transactions: usize,
    pub skipped_transactions: usize,
    pub errors: Vec<String>,
    pub account_metadata: Option<AccountMetadata>,
}

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn LedgerStore>,
    registry: Arc<ParserRegistry>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn LedgerStore>, registry: Arc<ParserRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Parses and reconciles one uploaded statement for `user_id`.
    ///
    /// Row-level problems end up in the summary. Whole-file problems are
    /// returned as errors after a `failed` upload record has been written.
    #[instrument(skip(self, bytes), fields(user_id = %user_id, size = bytes.len()))]
    pub async fn ingest(
        &self,
        user_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestionSummary, IngestionError> {
        let file_size = bytes.len() as i64;
        tracing::debug!(stage = IngestionStage::Received.as_str(), "Statement received");

        let format = match self.select_format(file_name, &bytes) {
            Ok(format) => format,
            Err(e) => return Err(self.fail(user_id, file_name, file_size, UNKNOWN_FORMAT, e).await),
        };
        tracing::debug!(
            stage = IngestionStage::FormatSelected.as_str(),
            format = format.as_str(),
            "Parser selected"
        );

        let parsed = match self.parse(format, file_name, bytes).await {
            Ok(parsed) if parsed.records.is_empty() => {
                let e = IngestionError::EmptyStatement {
                    file_name: file_name.to_string(),
                };
                return Err(self.fail(user_id, file_name, file_size, format.as_str(), e).await);
            }
            Ok(parsed) => parsed,
            Err(e) => return Err(self.fail(user_id, file_name, file_size, format.as_str(), e).await),
        };
        tracing::debug!(
            stage = IngestionStage::Parsed.as_str(),
            records = parsed.records.len(),
            "Statement parsed"
        );

        match self
            .persist(user_id, file_name, file_size, format, parsed)
            .await
        {
            Ok(summary) => {
                record_statement_upload(format.as_str(), UploadStatus::Completed.as_str());
                tracing::info!(
                    stage = IngestionStage::Summarized.as_str(),
                    file_id = %summary.file_id,
                    total = summary.total_transactions,
                    imported = summary.imported_transactions,
                    updated = summary.updated_transactions,
                    skipped = summary.skipped_transactions,
                    "Statement ingested"
                );
                Ok(summary)
            }
            Err(e) => Err(self
                .fail(user_id, file_name, file_size, format.as_str(), e.into())
                .await),
        }
    }

    fn select_format(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StatementFormat, IngestionError> {
        if bytes.is_empty() {
            return Err(IngestionError::EmptyUpload);
        }
        self.registry
            .select(file_name)
            .map(|parser| parser.format())
            .ok_or_else(|| IngestionError::UnsupportedFormat {
                file_name: file_name.to_string(),
            })
    }

    /// Parsing is CPU-bound and runs off the async workers.
    async fn parse(
        &self,
        format: StatementFormat,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ParseResult, IngestionError> {
        let name = file_name.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            format
                .parser()
                .parse(&mut Cursor::new(bytes), &name)
                .map_err(|e| IngestionError::Parse {
                    file_name: name.clone(),
                    message: e.message,
                })
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(e) => Err(IngestionError::Parse {
                file_name: file_name.to_string(),
                message: format!("parser task failed: {}", e),
            }),
        }
    }

    /// Everything from account registration to the upload record, inside
    /// one unit. The unit is dropped (and rolled back) on any error.
    async fn persist(
        &self,
        user_id: Uuid,
        file_name: &str,
        file_size: i64,
        format: StatementFormat,
        parsed: ParseResult,
    ) -> Result<IngestionSummary, StoreError> {
        let ParseResult {
            records,
            account_metadata,
        } = parsed;
        let now = Utc::now();
        let file_id = Uuid::new_v4();
        let statement_account = statement_account(account_metadata.as_ref(), &records);

        let mut unit = self.store.begin().await?;

        let account = match &statement_account {
            Some(number) => {
                let registration =
                    AccountRegistration::from_metadata(number.clone(), account_metadata.as_ref());
                Some(unit.upsert_account(user_id, &registration, now).await?)
            }
            None => None,
        };
        let prior_latest = match &account {
            Some(account) => unit.latest_transaction_date(account.account_id).await?,
            None => None,
        };

        tracing::debug!(stage = IngestionStage::Reconciling.as_str(), "Reconciling rows");
        let ctx = ReconcileContext {
            user_id,
            account_id: account.as_ref().map(|a| a.account_id),
            file_id,
            file_name,
            statement_account: statement_account.as_deref(),
            imported_at: now,
        };
        let tally = reconcile(unit.as_mut(), &ctx, &records).await?;

        let closing_balance = account_metadata.as_ref().and_then(|m| m.closing_balance);
        if let (Some(account), Some(closing)) = (&account, closing_balance) {
            let snapshot = Snapshot {
                user_id,
                account_id: account.account_id,
                currency: &account.currency,
                file_id,
                balance: closing,
                statement_date: account_metadata.as_ref().and_then(|m| m.statement_date),
                prior_latest,
                now,
            };
            record_snapshot(unit.as_mut(), snapshot, &records).await?;
        }

        let file = UploadedFile {
            file_id,
            user_id,
            account_id: account.as_ref().map(|a| a.account_id),
            file_name: file_name.to_string(),
            format: format.as_str().to_string(),
            file_size,
            total_transactions: records.len() as i32,
            imported_transactions: tally.created as i32,
            updated_transactions: tally.updated as i32,
            skipped_transactions: tally.skipped as i32,
            errors: UploadedFile::join_errors(&tally.errors),
            status: UploadStatus::Completed.as_str().to_string(),
            uploaded_utc: now,
        };
        unit.insert_uploaded_file(&file).await?;
        unit.commit().await?;

        record_tally(&tally);

        Ok(IngestionSummary {
            file_id,
            file_name: file.file_name,
            format: file.format,
            account_id: file.account_id,
            total_transactions: records.len(),
            imported_transactions: tally.created,
            updated_transactions: tally.updated,
            skipped_transactions: tally.skipped,
            errors: tally.errors,
            account_metadata,
        })
    }

    /// Writes the `failed` audit record and hands the error back.
    async fn fail(
        &self,
        user_id: Uuid,
        file_name: &str,
        file_size: i64,
        format: &str,
        error: IngestionError,
    ) -> IngestionError {
        tracing::warn!(
            stage = IngestionStage::Failed.as_str(),
            file_name = %file_name,
            error = %error,
            "Statement ingestion failed"
        );
        record_statement_upload(format, UploadStatus::Failed.as_str());
        record_error(error.kind());

        let file = UploadedFile {
            file_id: Uuid::new_v4(),
            user_id,
            account_id: None,
            file_name: file_name.to_string(),
            format: format.to_string(),
            file_size,
            total_transactions: 0,
            imported_transactions: 0,
            updated_transactions: 0,
            skipped_transactions: 0,
            errors: Some(error.to_string()),
            status: UploadStatus::Failed.as_str().to_string(),
            uploaded_utc: Utc::now(),
        };
        if let Err(e) = self.write_failed_upload(&file).await {
            tracing::error!(error = %e, file_name = %file_name, "Failed to record failed upload");
        }
        error
    }

    async fn write_failed_upload(&self, file: &UploadedFile) -> Result<(), StoreError> {
        let mut unit = self.store.begin().await?;
        unit.insert_uploaded_file(file).await?;
        unit.commit().await
    }
}

/// The statement's own account: metadata first, then the first record.
fn statement_account(
    metadata: Option<&AccountMetadata>,
    records: &[StatementRecord],
) -> Option<String> {
    metadata
        .and_then(|m| m.account_number.clone())
        .or_else(|| records.first().and_then(|r| r.account_number.clone()))
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

struct Snapshot<'a> {
    user_id: Uuid,
    account_id: Uuid,
    currency: &'a str,
    file_id: Uuid,
    balance: Decimal,
    statement_date: Option<NaiveDate>,
    prior_latest: Option<NaiveDate>,
    now: DateTime<Utc>,
}

/// Stores the closing balance unless the statement is older than what the
/// account already holds or a snapshot for that date exists.
async fn record_snapshot(
    unit: &mut dyn IngestionUnit,
    snapshot: Snapshot<'_>,
    records: &[StatementRecord],
) -> Result<(), StoreError> {
    let file_latest = records.iter().filter_map(StatementRecord::effective_date).max();

    if let (Some(file_latest), Some(prior)) = (file_latest, snapshot.prior_latest) {
        if file_latest < prior {
            tracing::info!(
                account_id = %snapshot.account_id,
                %file_latest,
                %prior,
                "Statement predates stored transactions, balance not recorded"
            );
            return Ok(());
        }
    }

    let balance_date = snapshot
        .statement_date
        .or(file_latest)
        .unwrap_or_else(|| snapshot.now.date_naive());
    let balance = AccountBalance {
        balance_id: Uuid::new_v4(),
        user_id: snapshot.user_id,
        account_id: snapshot.account_id,
        balance_date,
        balance: snapshot.balance,
        currency: snapshot.currency.to_string(),
        file_id: Some(snapshot.file_id),
        created_utc: snapshot.now,
    };

    if !unit.insert_balance_if_absent(&balance).await? {
        tracing::debug!(
            account_id = %snapshot.account_id,
            %balance_date,
            "Balance snapshot already exists"
        );
    }
    Ok(())
}

fn record_tally(tally: &ReconcileTally) {
    record_reconciled_rows("created", tally.created);
    record_reconciled_rows("updated", tally.updated);
    record_reconciled_rows("skipped", tally.skipped);
}
