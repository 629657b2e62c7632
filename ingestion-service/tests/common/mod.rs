//! Common test utilities for ingestion-service integration tests.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ingestion_service::config::IngestionConfig;
use ingestion_service::services::MemoryStore;
use ingestion_service::startup::{build_router, AppState};
use serde_json::Value;
use std::sync::{Arc, Once};
use tower::util::ServiceExt;
use uuid::Uuid;

static INIT: Once = Once::new();

const BOUNDARY: &str = "ingestion-test-boundary";

pub const ACCOUNT: &str = "40702810900000012345";
pub const COUNTERPARTY: &str = "40702810400000054321";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ingestion_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Router over a fresh in-memory store.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub user_id: Uuid,
}

pub fn spawn_app() -> TestApp {
    init_tracing();

    let store = MemoryStore::new();
    let state = AppState::new(IngestionConfig::for_tests(), Arc::new(store.clone()))
        .expect("Failed to build application state");

    TestApp {
        router: build_router(state),
        store,
        user_id: Uuid::new_v4(),
    }
}

#[allow(dead_code)]
impl TestApp {
    pub async fn get(&self, uri: &str, user_id: Option<Uuid>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id.to_string());
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn upload(&self, file_name: &str, content: &[u8], user_id: Uuid) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/transactions/upload")
            .header("x-user-id", user_id.to_string())
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(file_name, content)))
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

fn multipart_body(file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Semicolon-separated statement with a metadata block and the given rows.
#[allow(dead_code)]
pub fn statement_csv(closing_balance: &str, statement_date: &str, rows: &[String]) -> Vec<u8> {
    let mut text = format!(
        "Номер счета;{ACCOUNT}\n\
         Исходящий остаток;{closing_balance}\n\
         Дата выписки;{statement_date}\n\
         Дата;Номер;Сумма;Счет плательщика;Счет получателя;Получатель;Назначение платежа\n"
    );
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text.into_bytes()
}

/// An outgoing payment from the statement account.
#[allow(dead_code)]
pub fn payment_row(date: &str, doc: &str, amount: &str, purpose: &str) -> String {
    format!("{date};{doc};{amount};{ACCOUNT};{COUNTERPARTY};ИП Лютиков;{purpose}")
}
