//! 考勤记录与状态转换的 HTTP 处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    identity::ActorContext,
    middleware::AppState,
    models::{attendance::*, role::ActorRole},
};

#[derive(Debug, Deserialize)]
pub struct AttemptListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 创建考勤记录
pub async fn create_record(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(payload): Json<CreateRecordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.transition_service.create_record(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 查询单条考勤记录
/// 主体可以读自己的记录，其余调用方需要 Instructor 及以上
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(record_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.transition_service.get_record(record_id).await?;

    if actor.actor_id != record.subject_id {
        actor.require_role(ActorRole::Instructor)?;
    }

    Ok(Json(record))
}

/// 尝试一次状态转换
/// 拒绝同样返回 200：拒绝本身是被记录的历史，带原因码和仍可达目标
pub async fn attempt_transition(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(record_id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state
        .transition_service
        .attempt_transition(&actor, record_id, payload)
        .await?;

    Ok(Json(response))
}

/// 查询记录的转换尝试历史
pub async fn list_attempts(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(record_id): Path<Uuid>,
    Query(query): Query<AttemptListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.transition_service.get_record(record_id).await?;
    if actor.actor_id != record.subject_id {
        actor.require_role(ActorRole::Instructor)?;
    }

    let attempts = state
        .transition_service
        .list_attempts(record_id, query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    let count = attempts.len();

    Ok(Json(json!({
        "record_id": record_id,
        "current_state": record.current_state,
        "attempts": attempts,
        "count": count,
    })))
}
