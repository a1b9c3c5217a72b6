//! 配置目录服务
//!
//! 原因码、转换矩阵、授权规则、漂移阈值与提权规则合并为
//! 一个带版本号的文档：加载一次、全体组件共享，
//! 变更走与业务数据相同的审计优先写路径，没有可变全局量。

use chrono::{SubsecRound, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::identity::ActorContext;
use crate::models::audit::{AuditAction, AuditScope, NewAuditEntry};
use crate::models::catalog::*;
use crate::models::role::ActorRole;
use crate::repository::catalog_repo::CatalogRepository;
use crate::services::ledger_service::LedgerService;

struct CachedCatalog {
    version: i64,
    document: Arc<CatalogDocument>,
}

pub struct CatalogService {
    db: PgPool,
    cache: RwLock<CachedCatalog>,
}

/// 系统引导身份（版本 0 的发布者）
fn system_actor() -> Uuid {
    Uuid::nil()
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            cache: RwLock::new(CachedCatalog {
                version: 0,
                document: Arc::new(DEFAULT_CATALOG.clone()),
            }),
        }
    }

    /// 启动时加载生效版本；空库时持久化内置默认为版本 0
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), AppError> {
        let repo = CatalogRepository::new(self.db.clone());

        let row = match repo.latest_version().await? {
            Some(row) => row,
            None => {
                let row = CatalogVersion {
                    version: 0,
                    document: serde_json::to_value(&*DEFAULT_CATALOG)
                        .map_err(|e| AppError::Config(e.to_string()))?,
                    published_by: system_actor(),
                    justification: "bootstrap default catalog".to_string(),
                    published_at: Utc::now().trunc_subsecs(6),
                };

                let mut tx = self.db.begin().await?;
                CatalogRepository::insert_version_tx(&mut tx, &row).await?;
                LedgerService::append_in_tx(
                    &mut tx,
                    NewAuditEntry {
                        actor_id: system_actor(),
                        actor_role: ActorRole::SuperAdmin.as_str().to_string(),
                        action: AuditAction::CatalogPublish,
                        scope: AuditScope::Global,
                        scope_id: None,
                        resource_type: "config_catalog".to_string(),
                        resource_id: None,
                        before_state: None,
                        after_state: Some(serde_json::json!({"version": 0})),
                        justification: Some(row.justification.clone()),
                        trace_id: None,
                        source_ip: None,
                    },
                )
                .await?;
                tx.commit().await?;

                info!("Bootstrapped default catalog as version 0");
                row
            }
        };

        let document: CatalogDocument = serde_json::from_value(row.document.clone())
            .map_err(|e| AppError::Config(format!("catalog version {} unreadable: {}", row.version, e)))?;
        document
            .validate_document()
            .map_err(AppError::Config)?;

        let mut cache = self.cache.write().await;
        cache.version = row.version;
        cache.document = Arc::new(document);

        info!(version = row.version, "Catalog loaded");
        Ok(())
    }

    /// 当前生效文档（共享不可变快照）
    pub async fn current(&self) -> Arc<CatalogDocument> {
        self.cache.read().await.document.clone()
    }

    pub async fn current_version(&self) -> i64 {
        self.cache.read().await.version
    }

    /// 发布新版本：校验、落库（版本行 + 审计条目同事务）、刷新缓存
    #[instrument(skip(self, actor, request))]
    pub async fn publish(
        &self,
        actor: &ActorContext,
        request: PublishCatalogRequest,
    ) -> Result<i64, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        actor.require_role(ActorRole::Operator)?;

        request
            .document
            .validate_document()
            .map_err(AppError::Validation)?;

        let repo = CatalogRepository::new(self.db.clone());
        let current_version = repo.latest_version().await?.map(|r| r.version).unwrap_or(0);
        let next_version = current_version + 1;

        let row = CatalogVersion {
            version: next_version,
            document: serde_json::to_value(&request.document)
                .map_err(|e| AppError::Validation(e.to_string()))?,
            published_by: actor.actor_id,
            justification: request.justification.clone(),
            published_at: Utc::now().trunc_subsecs(6),
        };

        let mut tx = self.db.begin().await?;
        CatalogRepository::insert_version_tx(&mut tx, &row).await?;
        LedgerService::append_in_tx(
            &mut tx,
            NewAuditEntry {
                actor_id: actor.actor_id,
                actor_role: actor.role.as_str().to_string(),
                action: AuditAction::CatalogPublish,
                scope: AuditScope::Global,
                scope_id: None,
                resource_type: "config_catalog".to_string(),
                resource_id: None,
                before_state: Some(serde_json::json!({"version": current_version})),
                after_state: Some(serde_json::json!({"version": next_version})),
                justification: Some(request.justification),
                trace_id: None,
                source_ip: None,
            },
        )
        .await?;
        tx.commit().await?;

        let mut cache = self.cache.write().await;
        cache.version = next_version;
        cache.document = Arc::new(request.document);

        metrics::counter!("catalog.published").increment(1);
        info!(version = next_version, "Catalog version published");

        Ok(next_version)
    }
}
