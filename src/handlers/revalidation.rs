//! 复核队列的 HTTP 处理器

use axum::{
    extract::{Path, Query, State},
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
    models::{escalation::ResolveRevalidationRequest, role::ActorRole},
    repository::escalation_repo::QueueFilters,
};

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub user_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 查询复核队列（CRITICAL > HIGH > NORMAL > LOW，再按入队时间）
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_role(ActorRole::TenantAdmin)?;

    let filters = QueueFilters {
        status: query.status,
        priority: query.priority,
        user_id: query.user_id,
    };

    let items = state
        .escalation_service
        .list_queue(&filters, query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    let count = items.len();

    Ok(Json(json!({
        "items": items,
        "count": count,
    })))
}

/// 处置复核项（VALID 放行被扣留的权限，INVALID 维持扣留）
pub async fn resolve_item(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<ResolveRevalidationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .escalation_service
        .resolve_queue_item(&actor, item_id, payload)
        .await?;

    Ok(Json(item))
}
