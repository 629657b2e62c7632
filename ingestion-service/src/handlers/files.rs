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

pub async fn list_files(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let files = state.projections.list_files(&caller, page).await?;
    Ok(Json(files))
}

pub async fn get_file(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let file = state.projections.get_file(&caller, file_id).await?;
    Ok(Json(file))
}

pub async fn list_account_files(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let files = state
        .projections
        .list_account_files(&caller, account_id)
        .await?;
    Ok(Json(files))
}
