//! PostgreSQL-backed ledger store.

use crate::error::StoreError;
use crate::models::{
    Account, AccountBalance, AccountRegistration, Page, PageRequest, Transaction, UploadedFile,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{IngestionUnit, LedgerStore};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ingestion-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn IngestionUnit>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, account_number, client_name, tax_id, account_name, currency, last_statement_date, opening_balance, created_utc, updated_utc
            FROM accounts
            WHERE user_id = $1
            ORDER BY account_number
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(accounts)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, account_number, client_name, tax_id, account_name, currency, last_statement_date, opening_balance, created_utc, updated_utc
            FROM accounts
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(account)
    }

    async fn count_account_transactions(&self, account_id: Uuid) -> Result<i64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_account_transactions"])
            .start_timer();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        timer.observe_duration();
        Ok(count)
    }

    async fn count_user_transactions(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_transaction(
        &self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        select_transaction(&mut conn, user_id, external_id).await
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn latest_balance(&self, account_id: Uuid) -> Result<Option<AccountBalance>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_balance"])
            .start_timer();

        let balance = sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT balance_id, user_id, account_id, balance_date, balance, currency, file_id, created_utc
            FROM account_balances
            WHERE account_id = $1
            ORDER BY balance_date DESC, created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(balance)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_account_balances(
        &self,
        account_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_account_balances"])
            .start_timer();

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account_balances WHERE account_id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        let balances = sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT balance_id, user_id, account_id, balance_date, balance, currency, file_id, created_utc
            FROM account_balances
            WHERE account_id = $1
            ORDER BY balance_date DESC, created_utc DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(Page::new(balances, page, total as u64))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_user_balances(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<AccountBalance>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_user_balances"])
            .start_timer();

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let balances = sqlx::query_as::<_, AccountBalance>(
            r#"
            SELECT balance_id, user_id, account_id, balance_date, balance, currency, file_id, created_utc
            FROM account_balances
            WHERE user_id = $1
            ORDER BY balance_date DESC, created_utc DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(Page::new(balances, page, total as u64))
    }

    #[instrument(skip(self), fields(file_id = %file_id))]
    async fn get_uploaded_file(&self, file_id: Uuid) -> Result<Option<UploadedFile>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_uploaded_file"])
            .start_timer();

        let file = sqlx::query_as::<_, UploadedFile>(
            r#"
            SELECT file_id, user_id, account_id, file_name, format, file_size, total_transactions, imported_transactions, updated_transactions, skipped_transactions, errors, status, uploaded_utc
            FROM uploaded_files
            WHERE file_id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(file)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_uploaded_files(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<UploadedFile>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_uploaded_files"])
            .start_timer();

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM uploaded_files WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let files = sqlx::query_as::<_, UploadedFile>(
            r#"
            SELECT file_id, user_id, account_id, file_name, format, file_size, total_transactions, imported_transactions, updated_transactions, skipped_transactions, errors, status, uploaded_utc
            FROM uploaded_files
            WHERE user_id = $1
            ORDER BY uploaded_utc DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(Page::new(files, page, total as u64))
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn list_account_uploaded_files(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<UploadedFile>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_account_uploaded_files"])
            .start_timer();

        let files = sqlx::query_as::<_, UploadedFile>(
            r#"
            SELECT file_id, user_id, account_id, file_name, format, file_size, total_transactions, imported_transactions, updated_transactions, skipped_transactions, errors, status, uploaded_utc
            FROM uploaded_files
            WHERE account_id = $1
            ORDER BY uploaded_utc DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(files)
    }
}

async fn select_transaction(
    conn: &mut sqlx::PgConnection,
    user_id: Uuid,
    external_id: &str,
) -> Result<Option<Transaction>, StoreError> {
    let tx = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT transaction_id, user_id, account_id, file_id, external_id, description, amount, currency, transaction_date, merchant, direction, status, document_number, document_date, account_number, payer_name, payer_tax_id, payer_account, recipient_name, recipient_tax_id, recipient_account, payment_purpose, source_file_name, imported_utc, created_utc, updated_utc
        FROM transactions
        WHERE user_id = $1 AND external_id = $2
        "#,
    )
    .bind(user_id)
    .bind(external_id)
    .fetch_optional(conn)
    .await?;
    Ok(tx)
}

/// One database transaction per ingestion run; a savepoint per row.
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl IngestionUnit for PgUnit {
    #[instrument(skip(self, external_ids), fields(user_id = %user_id, count = external_ids.len()))]
    async fn find_transactions(
        &mut self,
        user_id: Uuid,
        external_ids: &[String],
    ) -> Result<HashMap<String, Transaction>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_transactions"])
            .start_timer();

        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, user_id, account_id, file_id, external_id, description, amount, currency, transaction_date, merchant, direction, status, document_number, document_date, account_number, payer_name, payer_tax_id, payer_account, recipient_name, recipient_tax_id, recipient_account, payment_purpose, source_file_name, imported_utc, created_utc, updated_utc
            FROM transactions
            WHERE user_id = $1 AND external_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(external_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        timer.observe_duration();
        Ok(rows
            .into_iter()
            .map(|tx| (tx.external_id.clone(), tx))
            .collect())
    }

    async fn find_transaction(
        &mut self,
        user_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        select_transaction(&mut self.tx, user_id, external_id).await
    }

    async fn insert_transaction(&mut self, t: &Transaction) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_transaction"])
            .start_timer();

        // DO NOTHING keeps the savepoint usable when a concurrent run got
        // there first.
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (transaction_id, user_id, account_id, file_id, external_id, description, amount, currency, transaction_date, merchant, direction, status, document_number, document_date, account_number, payer_name, payer_tax_id, payer_account, recipient_name, recipient_tax_id, recipient_account, payment_purpose, source_file_name, imported_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT (user_id, external_id) DO NOTHING
            "#,
        )
        .bind(t.transaction_id)
        .bind(t.user_id)
        .bind(t.account_id)
        .bind(t.file_id)
        .bind(&t.external_id)
        .bind(&t.description)
        .bind(t.amount)
        .bind(&t.currency)
        .bind(t.transaction_date)
        .bind(&t.merchant)
        .bind(&t.direction)
        .bind(&t.status)
        .bind(&t.document_number)
        .bind(t.document_date)
        .bind(&t.account_number)
        .bind(&t.payer_name)
        .bind(&t.payer_tax_id)
        .bind(&t.payer_account)
        .bind(&t.recipient_name)
        .bind(&t.recipient_tax_id)
        .bind(&t.recipient_account)
        .bind(&t.payment_purpose)
        .bind(&t.source_file_name)
        .bind(t.imported_utc)
        .bind(t.created_utc)
        .bind(t.updated_utc)
        .execute(&mut *self.tx)
        .await?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(StoreError::UniqueViolation(format!(
                "transactions (user_id, external_id) = ({}, {})",
                t.user_id, t.external_id
            )));
        }
        Ok(())
    }

    async fn update_transaction(&mut self, t: &Transaction) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_transaction"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET account_id = $3, file_id = $4, description = $5, merchant = $6, account_number = $7, payer_name = $8, payer_tax_id = $9, payer_account = $10, recipient_name = $11, recipient_tax_id = $12, recipient_account = $13, payment_purpose = $14, source_file_name = $15, imported_utc = $16, updated_utc = $17
            WHERE user_id = $1 AND external_id = $2
            "#,
        )
        .bind(t.user_id)
        .bind(&t.external_id)
        .bind(t.account_id)
        .bind(t.file_id)
        .bind(&t.description)
        .bind(&t.merchant)
        .bind(&t.account_number)
        .bind(&t.payer_name)
        .bind(&t.payer_tax_id)
        .bind(&t.payer_account)
        .bind(&t.recipient_name)
        .bind(&t.recipient_tax_id)
        .bind(&t.recipient_account)
        .bind(&t.payment_purpose)
        .bind(&t.source_file_name)
        .bind(t.imported_utc)
        .bind(t.updated_utc)
        .execute(&mut *self.tx)
        .await?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    #[instrument(skip(self, registration), fields(user_id = %user_id, account_number = %registration.account_number))]
    async fn upsert_account(
        &mut self,
        user_id: Uuid,
        registration: &AccountRegistration,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_account"])
            .start_timer();

        let candidate = registration.clone().into_new_account(user_id, now);
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, user_id, account_number, client_name, tax_id, account_name, currency, last_statement_date, opening_balance, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (user_id, account_number) DO UPDATE SET
                client_name = COALESCE(EXCLUDED.client_name, accounts.client_name),
                tax_id = COALESCE(EXCLUDED.tax_id, accounts.tax_id),
                account_name = COALESCE(EXCLUDED.account_name, accounts.account_name),
                currency = COALESCE($11, accounts.currency),
                last_statement_date = COALESCE(EXCLUDED.last_statement_date, accounts.last_statement_date),
                opening_balance = COALESCE(EXCLUDED.opening_balance, accounts.opening_balance),
                updated_utc = EXCLUDED.updated_utc
            RETURNING account_id, user_id, account_number, client_name, tax_id, account_name, currency, last_statement_date, opening_balance, created_utc, updated_utc
            "#,
        )
        .bind(candidate.account_id)
        .bind(candidate.user_id)
        .bind(&candidate.account_number)
        .bind(&candidate.client_name)
        .bind(&candidate.tax_id)
        .bind(&candidate.account_name)
        .bind(&candidate.currency)
        .bind(candidate.last_statement_date)
        .bind(candidate.opening_balance)
        .bind(now)
        .bind(&registration.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        timer.observe_duration();
        Ok(account)
    }

    async fn latest_transaction_date(
        &mut self,
        account_id: Uuid,
    ) -> Result<Option<NaiveDate>, StoreError> {
        let date: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT MAX(transaction_date)::date FROM transactions WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(date)
    }

    async fn insert_balance_if_absent(
        &mut self,
        b: &AccountBalance,
    ) -> Result<bool, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_balance"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO account_balances (balance_id, user_id, account_id, balance_date, balance, currency, file_id, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, balance_date) DO NOTHING
            "#,
        )
        .bind(b.balance_id)
        .bind(b.user_id)
        .bind(b.account_id)
        .bind(b.balance_date)
        .bind(b.balance)
        .bind(&b.currency)
        .bind(b.file_id)
        .bind(b.created_utc)
        .execute(&mut *self.tx)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn insert_uploaded_file(&mut self, f: &UploadedFile) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_uploaded_file"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO uploaded_files (file_id, user_id, account_id, file_name, format, file_size, total_transactions, imported_transactions, updated_transactions, skipped_transactions, errors, status, uploaded_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(f.file_id)
        .bind(f.user_id)
        .bind(f.account_id)
        .bind(&f.file_name)
        .bind(&f.format)
        .bind(f.file_size)
        .bind(f.total_transactions)
        .bind(f.imported_transactions)
        .bind(f.updated_transactions)
        .bind(f.skipped_transactions)
        .bind(&f.errors)
        .bind(&f.status)
        .bind(f.uploaded_utc)
        .execute(&mut *self.tx)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    async fn begin_row(&mut self) -> Result<(), StoreError> {
        sqlx::query("SAVEPOINT ingest_row")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn release_row(&mut self) -> Result<(), StoreError> {
        sqlx::query("RELEASE SAVEPOINT ingest_row")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn rollback_row(&mut self) -> Result<(), StoreError> {
        sqlx::query("ROLLBACK TO SAVEPOINT ingest_row")
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("RELEASE SAVEPOINT ingest_row")
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit"])
            .start_timer();
        let unit = *self;
        unit.tx.commit().await?;
        timer.observe_duration();
        Ok(())
    }
}
