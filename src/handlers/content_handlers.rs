//! HTTP handlers for stored content records.

use crate::{
    errors::AppError,
    models::content::{ContentRecord, ContentSummary},
    services::{database_sink::DEFAULT_LIST_LIMIT, pipeline::GenerationPipeline},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Query params accepted by `GET /contents`.
#[derive(Debug, Deserialize)]
pub struct ListContentsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET `/contents` — newest records first, without their bodies.
pub async fn list_contents(
    State(pipeline): State<GenerationPipeline>,
    Query(q): Query<ListContentsQuery>,
) -> Result<Json<Vec<ContentSummary>>, AppError> {
    let records = pipeline
        .records()
        .list(
            q.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            q.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(records))
}

/// GET `/content/{id}`
pub async fn get_content(
    State(pipeline): State<GenerationPipeline>,
    Path(id): Path<i64>,
) -> Result<Json<ContentRecord>, AppError> {
    let record = pipeline.records().get_by_id(id).await?;
    Ok(Json(record))
}

/// DELETE `/content/{id}` — the generated file, if any, is left alone.
pub async fn delete_content(
    State(pipeline): State<GenerationPipeline>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    pipeline.records().delete_by_id(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
