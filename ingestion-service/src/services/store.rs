//! Persistence seam for the ingestion pipeline.
//!
//! [`LedgerStore`] serves the read side and opens one [`IngestionUnit`] per
//! upload. A unit is all-or-nothing: nothing it wrote is visible to anyone
//! else until [`IngestionUnit::commit`], and dropping it uncommitted
//! discards every write. Inside a unit each row runs between
//! [`IngestionUnit::begin_row`] and either [`IngestionUnit::release_row`] or
//! [`IngestionUnit::rollback_row`], so a failed row leaves no trace while
//! its siblings persist.

use crate::error::StoreError;
use crate::models::{
    Account, AccountBalance, AccountRegistration, Page, PageRequest, Transaction, UploadedFile,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn IngestionUnit>, StoreError>;

    async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError>;

    /// Looks up by id alone; callers check ownership.
    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn count_account_transactions(&self, account_id: Uuid) -> Result<i64, StoreError>;

    async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, StoreError>;

    async fn get_transaction(
        &self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn latest_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError>;

    /// Snapshots newest first.
    async fn list_account_balances(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError>;

    /// Snapshots across all of a user's accounts, newest first.
    async fn list_user_balances(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError>;

    /// Looks up by id alone; callers check ownership.
    async fn get_uploaded_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError>;

    /// Uploads newest first.
    async fn list_uploaded_files(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<UploadedFile>, StoreError>;

    async fn list_account_uploaded_files(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<UploadedFile>, StoreError>;
}

#[async_trait]
pub trait IngestionUnit: Send {
    /// Existing transactions among `external_ids`, keyed by external id.
    async fn find_transactions(
        &mut self,
        user_id: Uuid,
        external_ids: &[String],
    ) -> Result<HashMap<String, Transaction>, StoreError>;

    async fn find_transaction(
        &mut self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the external id is
    /// already taken for the user.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Creates or refreshes the user's account with this number.
    async fn upsert_account(
        &mut self,
        user_id: Uuid,
        registration: &AccountRegistration,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    async fn latest_transaction_date(
        &mut self,
        account_id: Uuid,
    ) -> Result<Option<NaiveDate>, StoreError>;

    /// Returns `false` when a snapshot already exists for the account and
    /// date; the existing one is left untouched.
    async fn insert_balance_if_absent(
        &mut self,
        balance: &AccountBalance,
    ) -> Result<bool, StoreError>;

    async fn insert_uploaded_file(&mut self, file: &UploadedFile) -> Result<(), StoreError>;

    async fn begin_row(&mut self) -> Result<(), StoreError>;

    async fn release_row(&mut self) -> Result<(), StoreError>;

    async fn rollback_row(&mut self) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
