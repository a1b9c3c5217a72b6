//! 路由注册
//! 创建所有 API 路由并应用中间件
//!
//! 暴露面只有核心契约：转换尝试、漂移分类、提权评估、
//! 账本追加/查询/校验、复核队列和配置目录。没有用户管理、
//! 批量导入或报表出口。

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

const MAX_BODY_BYTES: usize = 256 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 核心业务端点（身份由网关头提供，提取器再校验）
    let api_routes = Router::new()
        // 考勤记录与转换
        .route(
            "/api/v1/attendance/records",
            post(handlers::attendance::create_record),
        )
        .route(
            "/api/v1/attendance/records/{id}",
            get(handlers::attendance::get_record),
        )
        .route(
            "/api/v1/attendance/records/{id}/transitions",
            post(handlers::attendance::attempt_transition),
        )
        .route(
            "/api/v1/attendance/records/{id}/attempts",
            get(handlers::attendance::list_attempts),
        )
        // 时间权威
        .route("/api/v1/time/classify", post(handlers::drift::classify_drift))
        // 提权检测
        .route(
            "/api/v1/escalations/evaluate",
            post(handlers::escalation::evaluate),
        )
        .route(
            "/api/v1/escalations/{event_id}/applicable",
            get(handlers::escalation::is_applicable),
        )
        // 审计账本
        .route(
            "/api/v1/ledger/entries",
            get(handlers::ledger::query_entries).post(handlers::ledger::append_entry),
        )
        .route(
            "/api/v1/ledger/entries/{id}/verify",
            get(handlers::ledger::verify_entry),
        )
        // 复核队列
        .route(
            "/api/v1/revalidations",
            get(handlers::revalidation::list_queue),
        )
        .route(
            "/api/v1/revalidations/{id}/resolve",
            post(handlers::revalidation::resolve_item),
        )
        // 配置目录
        .route(
            "/api/v1/catalog",
            get(handlers::catalog::get_catalog).put(handlers::catalog::publish_catalog),
        );

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(axum::middleware::from_fn(
            crate::middleware::request_tracking_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
