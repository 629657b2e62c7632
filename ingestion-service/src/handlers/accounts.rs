use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::middleware::CallerContext;
use uuid::Uuid;

pub async fn list_accounts(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<impl IntoResponse, AppError> {
    let accounts = state.projections.list_accounts(&caller).await?;
    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.projections.get_account(&caller, account_id).await?;
    Ok(Json(account))
}
