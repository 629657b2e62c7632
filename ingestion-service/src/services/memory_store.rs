//! In-process [`LedgerStore`], used when no database is configured and in
//! tests. Uniqueness rules match the PostgreSQL schema.
//!
//! An open unit holds the store lock until it commits or drops, so
//! ingestion runs are serialized. Writes apply in place and are recorded in
//! an undo log that row rollback and uncommitted drops replay.

use crate::error::StoreError;
use crate::models::{
    Account, AccountBalance, AccountRegistration, Page, PageRequest, Transaction, UploadedFile,
};
use crate::services::store::{IngestionUnit, LedgerStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

type TransactionKey = (Uuid, String);

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<TransactionKey, Transaction>,
    accounts: HashMap<Uuid, Account>,
    balances: Vec<AccountBalance>,
    files: Vec<UploadedFile>,
}

enum Undo {
    RemoveTransaction(TransactionKey),
    RestoreTransaction(Box<Transaction>),
    RemoveAccount(Uuid),
    RestoreAccount(Box<Account>),
    RemoveBalance(Uuid),
    RemoveFile(Uuid),
}

impl LedgerState {
    fn apply(&mut self, undo: Undo) {
        match undo {
            Undo::RemoveTransaction(key) => {
                self.transactions.remove(&key);
            }
            Undo::RestoreTransaction(tx) => {
                self.transactions
                    .insert((tx.user_id, tx.external_id.clone()), *tx);
            }
            Undo::RemoveAccount(id) => {
                self.accounts.remove(&id);
            }
            Undo::RestoreAccount(account) => {
                self.accounts.insert(account.account_id, *account);
            }
            Undo::RemoveBalance(id) => self.balances.retain(|b| b.balance_id != id),
            Undo::RemoveFile(id) => self.files.retain(|f| f.file_id != id),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_balances_first(balances: &mut [AccountBalance]) {
    balances.sort_by(|a, b| {
        b.balance_date
            .cmp(&a.balance_date)
            .then(b.created_utc.cmp(&a.created_utc))
    });
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn IngestionUnit>, StoreError> {
        let state = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryUnit {
            state,
            undo: Vec::new(),
            row_marks: Vec::new(),
            committed: false,
        }))
    }

    async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.account_number.cmp(&b.account_number));
        Ok(accounts)
    }

    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn count_account_transactions(&self, account_id: Uuid) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.account_id == Some(account_id))
            .count() as i64)
    }

    async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .count() as i64)
    }

    async fn get_transaction(
        &self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .get(&(user_id, external_id.to_string()))
            .cloned())
    }

    async fn latest_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError> {
        let state = self.state.lock().await;
        let mut balances: Vec<AccountBalance> = state
            .balances
            .iter()
            .filter(|b| b.account_id == account_id)
            .cloned()
            .collect();
        newest_balances_first(&mut balances);
        Ok(balances.into_iter().next())
    }

    async fn list_account_balances(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError> {
        let state = self.state.lock().await;
        let mut balances: Vec<AccountBalance> = state
            .balances
            .iter()
            .filter(|b| b.account_id == account_id)
            .cloned()
            .collect();
        newest_balances_first(&mut balances);
        Ok(page.slice(&balances))
    }

    async fn list_user_balances(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError> {
        let state = self.state.lock().await;
        let mut balances: Vec<AccountBalance> = state
            .balances
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        newest_balances_first(&mut balances);
        Ok(page.slice(&balances))
    }

    async fn get_uploaded_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.files.iter().find(|f| f.file_id == file_id).cloned())
    }

    async fn list_uploaded_files(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<UploadedFile>, StoreError> {
        let state = self.state.lock().await;
        let mut files: Vec<UploadedFile> = state
            .files
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_utc.cmp(&a.uploaded_utc));
        Ok(page.slice(&files))
    }

    async fn list_account_uploaded_files(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<UploadedFile>, StoreError> {
        let state = self.state.lock().await;
        let mut files: Vec<UploadedFile> = state
            .files
            .iter()
            .filter(|f| f.account_id == Some(account_id))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_utc.cmp(&a.uploaded_utc));
        Ok(files)
    }
}

pub struct MemoryUnit {
    state: OwnedMutexGuard<LedgerState>,
    undo: Vec<Undo>,
    row_marks: Vec<usize>,
    committed: bool,
}

impl MemoryUnit {
    fn undo_to(&mut self, mark: usize) {
        while self.undo.len() > mark {
            if let Some(entry) = self.undo.pop() {
                self.state.apply(entry);
            }
        }
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            debug!(writes = self.undo.len(), "Discarding uncommitted ingestion unit");
            self.undo_to(0);
        }
    }
}

#[async_trait]
impl IngestionUnit for MemoryUnit {
    async fn find_transactions(
        &mut self,
        user_id: Uuid,
        external_ids: &[String],
    ) -> Result<HashMap<String, Transaction>, StoreError> {
        Ok(external_ids
            .iter()
            .filter_map(|id| {
                self.state
                    .transactions
                    .get(&(user_id, id.clone()))
                    .map(|tx| (id.clone(), tx.clone()))
            })
            .collect())
    }

    async fn find_transaction(
        &mut self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .state
            .transactions
            .get(&(user_id, external_id.to_string()))
            .cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let key = (transaction.user_id, transaction.external_id.clone());
        if self.state.transactions.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "transactions (user_id, external_id) = ({}, {})",
                transaction.user_id, transaction.external_id
            )));
        }
        self.state.transactions.insert(key.clone(), transaction.clone());
        self.undo.push(Undo::RemoveTransaction(key));
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        let key = (transaction.user_id, transaction.external_id.clone());
        let previous = self
            .state
            .transactions
            .insert(key.clone(), transaction.clone());
        match previous {
            Some(previous) => {
                self.undo.push(Undo::RestoreTransaction(Box::new(previous)));
                Ok(())
            }
            None => {
                self.state.transactions.remove(&key);
                Err(StoreError::Database(sqlx::Error::RowNotFound))
            }
        }
    }

    async fn upsert_account(
        &mut self,
        user_id: Uuid,
        registration: &AccountRegistration,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let existing = self
            .state
            .accounts
            .values()
            .find(|a| a.user_id == user_id && a.account_number == registration.account_number)
            .cloned();

        let account = match existing {
            Some(existing) => {
                let merged = registration.apply_to(&existing, now);
                self.undo.push(Undo::RestoreAccount(Box::new(existing)));
                merged
            }
            None => {
                let created = registration.clone().into_new_account(user_id, now);
                self.undo.push(Undo::RemoveAccount(created.account_id));
                created
            }
        };
        self.state
            .accounts
            .insert(account.account_id, account.clone());
        Ok(account)
    }

    async fn latest_transaction_date(
        &mut self,
        account_id: Uuid,
    ) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .state
            .transactions
            .values()
            .filter(|t| t.account_id == Some(account_id))
            .map(|t| t.transaction_date.date())
            .max())
    }

    async fn insert_balance_if_absent(
        &mut self,
        balance: &AccountBalance,
    ) -> Result<bool, StoreError> {
        let exists = self
            .state
            .balances
            .iter()
            .any(|b| b.account_id == balance.account_id && b.balance_date == balance.balance_date);
        if exists {
            return Ok(false);
        }
        self.state.balances.push(balance.clone());
        self.undo.push(Undo::RemoveBalance(balance.balance_id));
        Ok(true)
    }

    async fn insert_uploaded_file(&mut self, file: &UploadedFile) -> Result<(), StoreError> {
        self.state.files.push(file.clone());
        self.undo.push(Undo::RemoveFile(file.file_id));
        Ok(())
    }

    async fn begin_row(&mut self) -> Result<(), StoreError> {
        self.row_marks.push(self.undo.len());
        Ok(())
    }

    async fn release_row(&mut self) -> Result<(), StoreError> {
        self.row_marks.pop();
        Ok(())
    }

    async fn rollback_row(&mut self) -> Result<(), StoreError> {
        if let Some(mark) = self.row_marks.pop() {
            self.undo_to(mark);
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}
