//! Tenant-checked read side: accounts, balance snapshots and upload history.
//!
//! Every lookup compares the caller with the owner stored on the row and
//! fails with `Forbidden` on mismatch instead of filtering the row out.

use crate::models::{Account, AccountBalance, Page, PageRequest, UploadedFile};
use crate::services::store::LedgerStore;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use service_core::middleware::CallerContext;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub account_id: Uuid,
    pub account_number: String,
    pub client_name: Option<String>,
    pub tax_id: Option<String>,
    pub account_name: Option<String>,
    pub currency: String,
    pub last_statement_date: Option<NaiveDate>,
    /// Latest snapshot, else the opening balance of the first statement.
    pub current_balance: Option<Decimal>,
    pub transaction_count: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub balance_id: Uuid,
    pub account_id: Uuid,
    pub balance_date: NaiveDate,
    pub balance: Decimal,
    pub currency: String,
    pub file_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl From<AccountBalance> for BalanceView {
    fn from(b: AccountBalance) -> Self {
        Self {
            balance_id: b.balance_id,
            account_id: b.account_id,
            balance_date: b.balance_date,
            balance: b.balance,
            currency: b.currency,
            file_id: b.file_id,
            created_utc: b.created_utc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileView {
    pub file_id: Uuid,
    pub account_id: Option<Uuid>,
    pub file_name: String,
    pub format: String,
    pub file_size: i64,
    pub total_transactions: i32,
    pub imported_transactions: i32,
    pub updated_transactions: i32,
    pub skipped_transactions: i32,
    pub errors: Vec<String>,
    pub status: String,
    pub uploaded_utc: DateTime<Utc>,
}

impl From<UploadedFile> for UploadedFileView {
    fn from(f: UploadedFile) -> Self {
        let errors = f.error_list();
        Self {
            file_id: f.file_id,
            account_id: f.account_id,
            file_name: f.file_name,
            format: f.format,
            file_size: f.file_size,
            total_transactions: f.total_transactions,
            imported_transactions: f.imported_transactions,
            updated_transactions: f.updated_transactions,
            skipped_transactions: f.skipped_transactions,
            errors,
            status: f.status,
            uploaded_utc: f.uploaded_utc,
        }
    }
}

fn ensure_owner(
    caller: &CallerContext,
    owner_id: Uuid,
    resource: &str,
    resource_id: Uuid,
) -> Result<(), AppError> {
    if caller.owns(owner_id) {
        return Ok(());
    }
    tracing::warn!(
        caller_id = %caller.user_id,
        owner_id = %owner_id,
        resource,
        resource_id = %resource_id,
        "Ownership check failed"
    );
    Err(AppError::Forbidden(anyhow::anyhow!(
        "Unauthorized access to {} {}",
        resource,
        resource_id
    )))
}

#[derive(Clone)]
pub struct ProjectionService {
    store: Arc<dyn LedgerStore>,
}

impl ProjectionService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_accounts(&self, caller: &CallerContext) -> Result<Vec<AccountView>, AppError> {
        let accounts = self.store.list_accounts(caller.user_id).await?;
        let mut views = Vec::with_capacity(accounts.len());
        for account in accounts {
            ensure_owner(caller, account.user_id, "account", account.account_id)?;
            views.push(self.account_view(account).await?);
        }
        Ok(views)
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_account(
        &self,
        caller: &CallerContext,
        account_id: Uuid,
    ) -> Result<AccountView, AppError> {
        let account = self.owned_account(caller, account_id).await?;
        self.account_view(account).await
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_balances(
        &self,
        caller: &CallerContext,
        page: PageRequest,
    ) -> Result<Page<BalanceView>, AppError> {
        let balances = self.store.list_user_balances(caller.user_id, page).await?;
        balances.try_map(|b| {
            ensure_owner(caller, b.user_id, "balance", b.balance_id)?;
            Ok(BalanceView::from(b))
        })
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_account_balances(
        &self,
        caller: &CallerContext,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<BalanceView>, AppError> {
        self.owned_account(caller, account_id).await?;
        let balances = self.store.list_account_balances(account_id, page).await?;
        balances.try_map(|b| {
            ensure_owner(caller, b.user_id, "balance", b.balance_id)?;
            Ok(BalanceView::from(b))
        })
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn latest_balance(
        &self,
        caller: &CallerContext,
        account_id: Uuid,
    ) -> Result<BalanceView, AppError> {
        self.owned_account(caller, account_id).await?;
        let balance = self
            .store
            .latest_balance(account_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "No balance recorded for account {}",
                    account_id
                ))
            })?;
        ensure_owner(caller, balance.user_id, "balance", balance.balance_id)?;
        Ok(balance.into())
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_files(
        &self,
        caller: &CallerContext,
        page: PageRequest,
    ) -> Result<Page<UploadedFileView>, AppError> {
        let files = self.store.list_uploaded_files(caller.user_id, page).await?;
        files.try_map(|f| {
            ensure_owner(caller, f.user_id, "uploaded file", f.file_id)?;
            Ok(UploadedFileView::from(f))
        })
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_file(
        &self,
        caller: &CallerContext,
        file_id: Uuid,
    ) -> Result<UploadedFileView, AppError> {
        let file = self
            .store
            .get_uploaded_file(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Uploaded file {} not found", file_id)))?;
        ensure_owner(caller, file.user_id, "uploaded file", file.file_id)?;
        Ok(file.into())
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_account_files(
        &self,
        caller: &CallerContext,
        account_id: Uuid,
    ) -> Result<Vec<UploadedFileView>, AppError> {
        self.owned_account(caller, account_id).await?;
        let files = self.store.list_account_uploaded_files(account_id).await?;
        files
            .into_iter()
            .map(|f| {
                ensure_owner(caller, f.user_id, "uploaded file", f.file_id)?;
                Ok(UploadedFileView::from(f))
            })
            .collect()
    }

    async fn owned_account(
        &self,
        caller: &CallerContext,
        account_id: Uuid,
    ) -> Result<Account, AppError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id)))?;
        ensure_owner(caller, account.user_id, "account", account.account_id)?;
        Ok(account)
    }

    async fn account_view(&self, account: Account) -> Result<AccountView, AppError> {
        let transaction_count = self
            .store
            .count_account_transactions(account.account_id)
            .await?;
        let current_balance = self
            .store
            .latest_balance(account.account_id)
            .await?
            .map(|b| b.balance)
            .or(account.opening_balance);

        Ok(AccountView {
            account_id: account.account_id,
            account_number: account.account_number,
            client_name: account.client_name,
            tax_id: account.tax_id,
            account_name: account.account_name,
            currency: account.currency,
            last_statement_date: account.last_statement_date,
            current_balance,
            transaction_count,
            created_utc: account.created_utc,
            updated_utc: account.updated_utc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRegistration;
    use crate::services::memory_store::MemoryStore;

    struct Fixture {
        projections: ProjectionService,
        owner: CallerContext,
        stranger: CallerContext,
        account: Account,
        file_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let owner = CallerContext::new(Uuid::new_v4());
        let now = Utc::now();

        let mut unit = store.begin().await.unwrap();
        let registration = AccountRegistration {
            account_number: "40702810900000012345".into(),
            opening_balance: Some(Decimal::new(10000, 2)),
            ..Default::default()
        };
        let account = unit
            .upsert_account(owner.user_id, &registration, now)
            .await
            .unwrap();
        let file_id = Uuid::new_v4();
        unit.insert_uploaded_file(&UploadedFile {
            file_id,
            user_id: owner.user_id,
            account_id: Some(account.account_id),
            file_name: "oct.csv".into(),
            format: "delimited".into(),
            file_size: 120,
            total_transactions: 2,
            imported_transactions: 1,
            updated_transactions: 0,
            skipped_transactions: 1,
            errors: Some("Failed to process transaction 3: amount is missing or unreadable".into()),
            status: "completed".into(),
            uploaded_utc: now,
        })
        .await
        .unwrap();
        unit.commit().await.unwrap();

        Fixture {
            projections: ProjectionService::new(Arc::new(store)),
            owner,
            stranger: CallerContext::new(Uuid::new_v4()),
            account,
            file_id,
        }
    }

    #[tokio::test]
    async fn owner_sees_account_with_fallback_balance() {
        let f = fixture().await;
        let view = f
            .projections
            .get_account(&f.owner, f.account.account_id)
            .await
            .unwrap();
        assert_eq!(view.current_balance, Some(Decimal::new(10000, 2)));
        assert_eq!(view.transaction_count, 0);

        let all = f.projections.list_accounts(&f.owner).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn other_tenant_is_forbidden_everywhere() {
        let f = fixture().await;
        let p = &f.projections;
        let id = f.account.account_id;
        let page = PageRequest::new(0, 20);

        assert!(matches!(p.get_account(&f.stranger, id).await, Err(AppError::Forbidden(_))));
        assert!(matches!(
            p.list_account_balances(&f.stranger, id, page).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(p.latest_balance(&f.stranger, id).await, Err(AppError::Forbidden(_))));
        assert!(matches!(
            p.list_account_files(&f.stranger, id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            p.get_file(&f.stranger, f.file_id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn stranger_lists_are_their_own() {
        let f = fixture().await;
        let page = PageRequest::new(0, 20);
        assert!(f.projections.list_accounts(&f.stranger).await.unwrap().is_empty());
        assert_eq!(
            f.projections
                .list_files(&f.stranger, page)
                .await
                .unwrap()
                .total_elements,
            0
        );
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.projections.get_account(&f.owner, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.projections.get_file(&f.owner, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            f.projections.latest_balance(&f.owner, f.account.account_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_view_splits_errors() {
        let f = fixture().await;
        let view = f.projections.get_file(&f.owner, f.file_id).await.unwrap();
        assert_eq!(view.errors.len(), 1);
        assert!(view.errors[0].starts_with("Failed to process transaction 3"));

        let by_account = f
            .projections
            .list_account_files(&f.owner, f.account.account_id)
            .await
            .unwrap();
        assert_eq!(by_account.len(), 1);
    }
}
