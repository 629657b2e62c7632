//! Domain models for ingestion-service.

#![allow(clippy::should_implement_trait)]

pub mod account;
pub mod balance;
pub mod page;
pub mod statement;
pub mod transaction;
pub mod uploaded_file;

pub use account::{Account, AccountRegistration};
pub use balance::AccountBalance;
pub use page::{Page, PageRequest};
pub use statement::{AccountMetadata, StatementRecord, DEFAULT_CURRENCY};
pub use transaction::{Transaction, TransactionDirection, TransactionStatus};
pub use uploaded_file::{UploadStatus, UploadedFile};
