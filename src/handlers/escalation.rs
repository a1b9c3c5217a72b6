//! 提权评估的 HTTP 处理器

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    identity::ActorContext,
    middleware::AppState,
    models::{escalation::EvaluateEscalationRequest, role::ActorRole},
};

/// 评估一次角色变更
/// 调用服务必须先拿到这里的结论（且已持久化）才能应用变更
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(payload): Json<EvaluateEscalationRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 角色管理属于租户管理员及以上
    actor.require_role(ActorRole::TenantAdmin)?;

    let verdict = state.escalation_service.evaluate(&actor, payload).await?;
    Ok(Json(verdict))
}

/// 查询角色变更当前是否可生效（复核门）
pub async fn is_applicable(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(event_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_role(ActorRole::TenantAdmin)?;

    let applicable = state.escalation_service.is_change_applicable(event_id).await?;
    Ok(Json(json!({
        "event_id": event_id,
        "applicable": applicable,
    })))
}
