//! Integration tests for statement upload.

mod common;

use axum::http::StatusCode;
use common::{payment_row, spawn_app, statement_csv, TestApp};
use ingestion_service::config::IngestionConfig;
use ingestion_service::services::MemoryStore;
use ingestion_service::startup::{build_router, AppState};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn october_statement_reports_created_updated_and_skipped_rows() {
    let app = spawn_app();

    let september = statement_csv(
        "900,00",
        "30.09.2024",
        &[payment_row("02.10.2024", "2", "250,00", "Аренда")],
    );
    let (status, _) = app
        .upload("statement_sep.csv", &september, app.user_id)
        .await;
    assert_eq!(status, StatusCode::OK);

    let october = statement_csv(
        "1500,00",
        "31.10.2024",
        &[
            payment_row("01.10.2024", "1", "100,00", "Оплата"),
            payment_row("02.10.2024", "2", "250,00", "Аренда за октябрь"),
            payment_row("03.10.2024", "3", "", "Комиссия"),
        ],
    );
    let (status, body) = app.upload("statement_oct.csv", &october, app.user_id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fileName"], "statement_oct.csv");
    assert_eq!(body["totalTransactions"], 3);
    assert_eq!(body["importedTransactions"], 1);
    assert_eq!(body["updatedTransactions"], 1);
    assert_eq!(body["skippedTransactions"], 1);
    assert_eq!(
        body["errors"][0],
        "Failed to process transaction 3: amount is missing or unreadable"
    );
    assert_eq!(body["accountMetadata"]["accountNumber"], common::ACCOUNT);
}

#[tokio::test]
async fn uploading_the_same_file_twice_is_idempotent() {
    let app = spawn_app();
    let file = statement_csv(
        "1000,00",
        "31.10.2024",
        &[
            payment_row("01.10.2024", "1", "100,00", "a"),
            payment_row("02.10.2024", "2", "200,00", "b"),
        ],
    );

    let (_, first) = app.upload("oct.csv", &file, app.user_id).await;
    assert_eq!(first["importedTransactions"], 2);

    let (status, second) = app.upload("oct.csv", &file, app.user_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["importedTransactions"], 0);
    assert_eq!(second["updatedTransactions"], 2);
    assert_eq!(second["totalTransactions"], 2);

    let (_, accounts) = app.get("/api/accounts", Some(app.user_id)).await;
    assert_eq!(accounts[0]["transactionCount"], 2);
}

#[tokio::test]
async fn unsupported_format_is_a_bad_request() {
    let app = spawn_app();

    let (status, body) = app.upload("notes.pdf", b"%PDF-1.4", app.user_id).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("notes.pdf"));
}

#[tokio::test]
async fn empty_statement_is_rejected_and_audited() {
    let app = spawn_app();
    let file = statement_csv("0", "31.10.2024", &[]);

    let (status, body) = app.upload("blank.csv", &file, app.user_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("No transactions found in blank.csv"));

    let (status, files) = app.get("/api/files", Some(app.user_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files["totalElements"], 1);
    assert_eq!(files["content"][0]["status"], "failed");
    assert_eq!(files["content"][0]["totalTransactions"], 0);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let app = spawn_app();

    let (status, _) = app.upload("empty.csv", b"", app.user_id).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn requests_without_caller_identity_are_unauthorized() {
    let app = spawn_app();

    let (status, _) = app.get("/api/accounts", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn supported_formats_lists_every_parser() {
    let app = spawn_app();

    let (status, body) = app
        .get("/api/transactions/supported-formats", Some(Uuid::new_v4()))
        .await;

    assert_eq!(status, StatusCode::OK);
    let formats: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["format"].as_str().unwrap())
        .collect();
    assert_eq!(formats, vec!["one_c", "spreadsheet", "delimited"]);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let store = MemoryStore::new();
    let config = IngestionConfig {
        max_upload_bytes: 64,
        ..IngestionConfig::for_tests()
    };
    let state = AppState::new(config, Arc::new(store.clone())).unwrap();
    let app = TestApp {
        router: build_router(state),
        store,
        user_id: Uuid::new_v4(),
    };

    let file = statement_csv(
        "1000,00",
        "31.10.2024",
        &[payment_row("01.10.2024", "1", "100,00", "a")],
    );
    let (status, _) = app.upload("oct.csv", &file, app.user_id).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
