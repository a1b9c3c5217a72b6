//! 时钟漂移分类的 HTTP 处理器

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::{
    error::AppError, identity::ActorContext, middleware::AppState, models::drift::*,
};

/// 分类一次客户端时间戳
/// 响应里的 action 告诉调用方对原始操作怎么处理：
/// PROCEED / PROCEED_FLAGGED 放行，REJECT / REJECT_INCIDENT 拒绝
pub async fn classify_drift(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(payload): Json<ClassifyDriftRequest>,
) -> Result<impl IntoResponse, AppError> {
    let verdict = state.time_authority.classify_drift(&actor, payload).await?;
    Ok(Json(verdict))
}
