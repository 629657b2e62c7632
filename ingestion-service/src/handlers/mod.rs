pub mod accounts;
pub mod balances;
pub mod files;
pub mod health;
pub mod transactions;

pub use accounts::{get_account, list_accounts};
pub use balances::{latest_balance, list_account_balances, list_balances};
pub use files::{get_file, list_account_files, list_files};
pub use health::{health_check, metrics_handler, readiness_check};
pub use transactions::{supported_formats, upload_statement};
