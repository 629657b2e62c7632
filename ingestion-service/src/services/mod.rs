//! Services module for ingestion-service.

pub mod classify;
pub mod database;
pub mod identity;
pub mod ingestion;
pub mod memory_store;
pub mod metrics;
pub mod projections;
pub mod reconciliation;
pub mod store;

pub use classify::classify;
pub use database::PgStore;
pub use identity::{assign_identities, external_id};
pub use ingestion::{IngestionService, IngestionStage, IngestionSummary};
pub use memory_store::MemoryStore;
pub use metrics::{
    get_metrics, http_metrics_middleware, init_metrics, record_error, record_reconciled_rows,
    record_statement_upload,
};
pub use projections::{AccountView, BalanceView, ProjectionService, UploadedFileView};
pub use reconciliation::{reconcile, ReconcileContext, ReconcileTally, RowOutcome};
pub use store::{IngestionUnit, LedgerStore};
