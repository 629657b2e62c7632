use crate::models::PageRequest;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::middleware::CallerContext;
use uuid::Uuid;

pub async fn list_balances(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let balances = state.projections.list_balances(&caller, page).await?;
    Ok(Json(balances))
}

pub async fn list_account_balances(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(account_id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let balances = state
        .projections
        .list_account_balances(&caller, account_id, page)
        .await?;
    Ok(Json(balances))
}

pub async fn latest_balance(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.projections.latest_balance(&caller, account_id).await?;
    Ok(Json(balance))
}
