use crate::startup::AppState;
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::middleware::CallerContext;

const FILE_FIELD: &str = "file";

fn multipart_error(e: MultipartError, max_bytes: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!("File too large (max {} bytes)", max_bytes))
    } else {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart body: {}", e))
    }
}

/// Pulls the `file` part out of the form as (file name, bytes).
async fn read_file_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("statement").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?
            .to_vec();

        if data.len() > max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File too large (max {} bytes)",
                max_bytes
            )));
        }
        return Ok((file_name, data));
    }

    Err(AppError::BadRequest(anyhow::anyhow!(
        "Multipart field '{}' is required",
        FILE_FIELD
    )))
}

pub async fn upload_statement(
    State(state): State<AppState>,
    caller: CallerContext,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let (file_name, data) = read_file_field(&mut multipart, state.config.max_upload_bytes).await?;

    tracing::info!(
        user_id = %caller.user_id,
        file_name = %file_name,
        size = data.len(),
        "Statement upload started"
    );

    let summary = state
        .ingestion
        .ingest(caller.user_id, &file_name, data)
        .await?;

    Ok(Json(summary))
}

pub async fn supported_formats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ingestion.registry().supported_formats())
}
