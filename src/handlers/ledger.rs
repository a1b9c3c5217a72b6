//! 审计账本的 HTTP 处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppError,
    identity::ActorContext,
    middleware::AppState,
    models::{audit::*, role::ActorRole},
};

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 外部协作方追加领域事件
pub async fn append_entry(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(payload): Json<ExternalAppendRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry_id = state.ledger_service.append_external(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(json!({ "entry_id": entry_id }))))
}

/// 查询审计条目
/// 可见范围由调用方身份结构性决定，过滤条件只在范围内生效
pub async fn query_entries(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Query(query): Query<LedgerQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filters = AuditEntryFilters {
        actor_id: query.actor_id,
        action: query.action,
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        start_time: query.start_time,
        end_time: query.end_time,
    };

    let (entries, total) = state
        .ledger_service
        .query(&actor, &filters, query.limit.clamp(1, 500), query.offset.max(0))
        .await?;
    let count = entries.len();

    Ok(Json(json!({
        "entries": entries,
        "count": count,
        "total": total,
    })))
}

/// 校验单条审计条目
/// 不匹配返回 "需要人工复查" 状态；条目已被冻结，绝不修复或删除
pub async fn verify_entry(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Path(entry_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    actor.require_role(ActorRole::Operator)?;

    let outcome = state.ledger_service.verify(entry_id, "verify_endpoint").await?;
    let requires_review = outcome == VerifyOutcome::Mismatch;

    // 校验本身是特权读取，同样入账
    state
        .ledger_service
        .append(NewAuditEntry {
            actor_id: actor.actor_id,
            actor_role: actor.role.as_str().to_string(),
            action: AuditAction::LedgerVerify,
            scope: AuditScope::Global,
            scope_id: None,
            resource_type: "audit_entry".to_string(),
            resource_id: Some(entry_id),
            before_state: None,
            after_state: Some(json!({ "outcome": &outcome })),
            justification: None,
            trace_id: None,
            source_ip: None,
        })
        .await?;

    Ok(Json(json!({
        "entry_id": entry_id,
        "outcome": outcome,
        "requires_review": requires_review,
    })))
}
