//! Ingestion Service - bank statement parsing, deduplication and tenant-scoped reconciliation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod parsers;
pub mod services;
pub mod startup;
