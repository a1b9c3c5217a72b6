//! 配置目录的 HTTP 处理器

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AppError,
    identity::ActorContext,
    middleware::AppState,
    models::catalog::PublishCatalogRequest,
};

/// 当前生效的目录版本与文档
pub async fn get_catalog(
    State(state): State<Arc<AppState>>,
    _actor: ActorContext,
) -> Result<impl IntoResponse, AppError> {
    let version = state.catalog_service.current_version().await;
    let document = state.catalog_service.current().await;

    Ok(Json(json!({
        "version": version,
        "document": &*document,
    })))
}

/// 发布新目录版本（版本行与审计条目同事务落库）
pub async fn publish_catalog(
    State(state): State<Arc<AppState>>,
    actor: ActorContext,
    Json(payload): Json<PublishCatalogRequest>,
) -> Result<impl IntoResponse, AppError> {
    let version = state.catalog_service.publish(&actor, payload).await?;

    Ok(Json(json!({ "version": version })))
}
