//! Integration tests for the tenant-checked read endpoints.

mod common;

use axum::http::StatusCode;
use common::{payment_row, spawn_app, statement_csv, TestApp};
use uuid::Uuid;

/// Uploads one statement for the app's user and returns (account id, file id).
async fn seed(app: &TestApp) -> (String, String) {
    let file = statement_csv(
        "1500,00",
        "31.10.2024",
        &[payment_row("01.10.2024", "1", "100,00", "Оплата")],
    );
    let (status, body) = app.upload("oct.csv", &file, app.user_id).await;
    assert_eq!(status, StatusCode::OK);
    (
        body["accountId"].as_str().unwrap().to_string(),
        body["fileId"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn owner_reads_account_balances_and_files() {
    let app = spawn_app();
    let (account_id, file_id) = seed(&app).await;
    let owner = Some(app.user_id);

    let (status, account) = app.get(&format!("/api/accounts/{account_id}"), owner).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["accountNumber"], common::ACCOUNT);
    assert_eq!(account["currentBalance"], "1500.00");
    assert_eq!(account["transactionCount"], 1);

    let (status, latest) = app
        .get(&format!("/api/balances/account/{account_id}/latest"), owner)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["balanceDate"], "2024-10-31");

    let (_, page) = app
        .get(&format!("/api/balances/account/{account_id}?page=0&size=5"), owner)
        .await;
    assert_eq!(page["totalElements"], 1);
    assert_eq!(page["size"], 5);

    let (_, all) = app.get("/api/balances", owner).await;
    assert_eq!(all["totalElements"], 1);

    let (status, file) = app.get(&format!("/api/files/{file_id}"), owner).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["status"], "completed");
    assert_eq!(file["format"], "delimited");

    let (_, files) = app
        .get(&format!("/api/files/account/{account_id}"), owner)
        .await;
    assert_eq!(files.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn other_tenant_gets_forbidden_not_empty() {
    let app = spawn_app();
    let (account_id, file_id) = seed(&app).await;
    let stranger = Some(Uuid::new_v4());

    for uri in [
        format!("/api/accounts/{account_id}"),
        format!("/api/balances/account/{account_id}"),
        format!("/api/balances/account/{account_id}/latest"),
        format!("/api/files/{file_id}"),
        format!("/api/files/account/{account_id}"),
    ] {
        let (status, _) = app.get(&uri, stranger).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    let (status, accounts) = app.get("/api/accounts", stranger).await;
    assert_eq!(status, StatusCode::OK);
    assert!(accounts.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = spawn_app();
    let owner = Some(app.user_id);

    let (status, _) = app
        .get(&format!("/api/accounts/{}", Uuid::new_v4()), owner)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .get(&format!("/api/files/{}", Uuid::new_v4()), owner)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics_respond() {
    let app = spawn_app();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
