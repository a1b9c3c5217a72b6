//! 审计账本服务
//!
//! 写入时封检（计算校验和），读取按调用方范围结构性裁剪，
//! 特权读取自身也会追加一条审计（审计审计者）

use chrono::{SubsecRound, Utc};
use futures::stream::BoxStream;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::checksum;
use crate::error::AppError;
use crate::identity::ActorContext;
use crate::models::audit::*;
use crate::models::role::ActorRole;
use crate::repository::ledger_repo::{LedgerRepository, ScopeRestriction};

pub struct LedgerService {
    repo: LedgerRepository,
}

impl LedgerService {
    pub fn new(db: PgPool) -> Self {
        Self {
            repo: LedgerRepository::new(db),
        }
    }

    /// 封检：分配 id 与时间戳，对不可变字段计算校验和
    pub fn seal_entry(new: &NewAuditEntry) -> AuditEntry {
        // timestamptz 只保留微秒，先截断再哈希
        let occurred_at = Utc::now().trunc_subsecs(6);
        let id = Uuid::new_v4();

        let checksum = checksum::audit_entry_checksum(
            new.actor_id,
            &new.actor_role,
            new.action.as_str(),
            new.scope.as_str(),
            &new.scope_id,
            &new.resource_type,
            &new.resource_id,
            &new.before_state,
            &new.after_state,
            &occurred_at,
        );

        AuditEntry {
            id,
            actor_id: new.actor_id,
            actor_role: new.actor_role.clone(),
            action: new.action.as_str().to_string(),
            scope_type: new.scope.as_str().to_string(),
            scope_id: new.scope_id,
            resource_type: new.resource_type.clone(),
            resource_id: new.resource_id,
            before_state: new.before_state.clone(),
            after_state: new.after_state.clone(),
            justification: new.justification.clone(),
            trace_id: new.trace_id.clone(),
            source_ip: new.source_ip.clone(),
            occurred_at,
            checksum,
        }
    }

    /// 追加审计条目
    #[instrument(skip(self, new))]
    pub async fn append(&self, new: NewAuditEntry) -> Result<Uuid, AppError> {
        let entry = Self::seal_entry(&new);
        self.repo.insert_entry(&entry).await?;

        metrics::counter!("ledger.append.total").increment(1);
        Ok(entry.id)
    }

    /// 在调用方事务内追加：状态变更与账本条目要么同时提交要么都不存在
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        new: NewAuditEntry,
    ) -> Result<Uuid, AppError> {
        let entry = Self::seal_entry(&new);
        LedgerRepository::insert_entry_tx(tx, &entry).await?;

        metrics::counter!("ledger.append.total").increment(1);
        Ok(entry.id)
    }

    pub async fn find_entry(&self, id: Uuid) -> Result<Option<AuditEntry>, AppError> {
        self.repo.find_entry(id).await
    }

    /// 重算条目的校验和
    pub fn recompute_checksum(entry: &AuditEntry) -> String {
        checksum::audit_entry_checksum(
            entry.actor_id,
            &entry.actor_role,
            &entry.action,
            &entry.scope_type,
            &entry.scope_id,
            &entry.resource_type,
            &entry.resource_id,
            &entry.before_state,
            &entry.after_state,
            &entry.occurred_at,
        )
    }

    /// 校验单个条目
    /// 不匹配即完整性故障：记录事件并冻结待查，绝不修复、绝不删除
    #[instrument(skip(self))]
    pub async fn verify(&self, entry_id: Uuid, detected_by: &str) -> Result<VerifyOutcome, AppError> {
        let entry = self
            .repo
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| AppError::NotFound("audit entry".to_string()))?;

        self.verify_entry(&entry, detected_by).await
    }

    /// 校验已加载的条目（后台抽样复用）
    pub async fn verify_entry(
        &self,
        entry: &AuditEntry,
        detected_by: &str,
    ) -> Result<VerifyOutcome, AppError> {
        let computed = Self::recompute_checksum(entry);

        if computed == entry.checksum {
            metrics::counter!("ledger.verify.total", "outcome" => "valid").increment(1);
            return Ok(VerifyOutcome::Valid);
        }

        metrics::counter!("ledger.verify.total", "outcome" => "mismatch").increment(1);
        error!(
            entry_id = %entry.id,
            stored = %entry.checksum,
            computed = %computed,
            "Audit entry checksum mismatch, freezing for review"
        );

        // 同一条目重复发现不重复立事件
        if !self.repo.has_incident(entry.id).await? {
            let incident = IntegrityIncident {
                id: Uuid::new_v4(),
                entry_id: entry.id,
                stored_checksum: entry.checksum.clone(),
                computed_checksum: computed,
                detected_by: detected_by.to_string(),
                detected_at: Utc::now().trunc_subsecs(6),
            };
            self.repo.insert_incident(&incident).await?;
        }

        Ok(VerifyOutcome::Mismatch)
    }

    /// 由调用方身份推导结构性可见范围
    /// 范围是读取路径的必选入参，不可能构造出不带范围的查询
    pub fn scope_restriction_for(actor: &ActorContext) -> ScopeRestriction {
        if actor.is_top_tier() {
            ScopeRestriction::All
        } else if actor.role == ActorRole::TenantAdmin {
            match actor.tenant_id {
                Some(tenant_id) => ScopeRestriction::TenantAndOwn {
                    tenant_id,
                    actor_id: actor.actor_id,
                },
                // 没有租户的租户管理员按最小可见处理
                None => ScopeRestriction::OwnOnly {
                    actor_id: actor.actor_id,
                },
            }
        } else {
            ScopeRestriction::OwnOnly {
                actor_id: actor.actor_id,
            }
        }
    }

    /// 查询账本
    /// 特权读取（非仅本人范围）本身追加一条 ledger.query 审计
    #[instrument(skip(self, actor, filters))]
    pub async fn query(
        &self,
        actor: &ActorContext,
        filters: &AuditEntryFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditEntry>, i64), AppError> {
        let scope = Self::scope_restriction_for(actor);

        let entries = self.repo.query_entries(filters, scope, limit, offset).await?;
        let total = self.repo.count_entries(filters, scope).await?;

        if !matches!(scope, ScopeRestriction::OwnOnly { .. }) {
            self.append(NewAuditEntry {
                actor_id: actor.actor_id,
                actor_role: actor.role.as_str().to_string(),
                action: AuditAction::LedgerQuery,
                scope: AuditScope::Global,
                scope_id: None,
                resource_type: "audit_entries".to_string(),
                resource_id: None,
                before_state: None,
                after_state: Some(serde_json::json!({
                    "returned": entries.len(),
                    "total": total,
                })),
                justification: None,
                trace_id: None,
                source_ip: None,
            })
            .await?;
        }

        Ok((entries, total))
    }

    /// 主体流式读取自己的 USER 条目
    pub fn stream_own(&self, actor_id: Uuid) -> BoxStream<'_, Result<AuditEntry, sqlx::Error>> {
        self.repo.stream_own_entries(actor_id)
    }

    /// 随机抽样（后台校验）
    pub async fn sample_entries(&self, n: i64) -> Result<Vec<AuditEntry>, AppError> {
        self.repo.sample_entries(n).await
    }

    /// 外部协作方直接追加领域事件
    /// 范围声明必须与调用方身份匹配：GLOBAL 只有顶层角色可写，
    /// TENANT 必须是本租户管理员及以上
    #[instrument(skip(self, actor, request))]
    pub async fn append_external(
        &self,
        actor: &ActorContext,
        request: ExternalAppendRequest,
    ) -> Result<Uuid, AppError> {
        use validator::Validate;
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if !request.action.contains('.') {
            return Err(AppError::Validation(
                "action must be a dotted hierarchical name".to_string(),
            ));
        }

        match request.scope {
            AuditScope::Global => {
                if !actor.is_top_tier() {
                    return Err(AppError::Forbidden);
                }
            }
            AuditScope::Tenant => {
                let own_tenant = actor.tenant_id.is_some() && actor.tenant_id == request.scope_id;
                if !(actor.is_top_tier()
                    || (actor.role == ActorRole::TenantAdmin && own_tenant))
                {
                    warn!(
                        actor_id = %actor.actor_id,
                        role = actor.role.as_str(),
                        "External append with mismatched tenant scope"
                    );
                    return Err(AppError::Forbidden);
                }
            }
            AuditScope::User => {}
        }

        let occurred_at = Utc::now().trunc_subsecs(6);
        let id = Uuid::new_v4();
        let actor_role = actor.role.as_str().to_string();

        let entry = AuditEntry {
            id,
            actor_id: actor.actor_id,
            actor_role: actor_role.clone(),
            action: request.action.clone(),
            scope_type: request.scope.as_str().to_string(),
            scope_id: request.scope_id,
            resource_type: request.resource_type.clone(),
            resource_id: request.resource_id,
            before_state: request.before_state.clone(),
            after_state: request.after_state.clone(),
            justification: request.justification.clone(),
            trace_id: None,
            source_ip: None,
            occurred_at,
            checksum: checksum::audit_entry_checksum(
                actor.actor_id,
                &actor_role,
                &request.action,
                request.scope.as_str(),
                &request.scope_id,
                &request.resource_type,
                &request.resource_id,
                &request.before_state,
                &request.after_state,
                &occurred_at,
            ),
        };

        self.repo.insert_entry(&entry).await?;
        metrics::counter!("ledger.append.total").increment(1);

        Ok(entry.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: ActorRole, tenant: Option<Uuid>) -> ActorContext {
        ActorContext {
            actor_id: Uuid::new_v4(),
            role,
            tenant_id: tenant,
            permissions: vec![],
        }
    }

    fn sample_new_entry() -> NewAuditEntry {
        NewAuditEntry {
            actor_id: Uuid::new_v4(),
            actor_role: "OPERATOR".to_string(),
            action: AuditAction::LedgerAppend,
            scope: AuditScope::Tenant,
            scope_id: Some(Uuid::new_v4()),
            resource_type: "attendance_record".to_string(),
            resource_id: Some(Uuid::new_v4()),
            before_state: Some(serde_json::json!({"state": "VERIFIED"})),
            after_state: Some(serde_json::json!({"state": "FLAGGED"})),
            justification: None,
            trace_id: None,
            source_ip: None,
        }
    }

    #[test]
    fn test_sealed_entry_checksum_verifies() {
        let entry = LedgerService::seal_entry(&sample_new_entry());
        assert_eq!(LedgerService::recompute_checksum(&entry), entry.checksum);
    }

    #[test]
    fn test_tampered_entry_fails_verification() {
        let mut entry = LedgerService::seal_entry(&sample_new_entry());
        entry.after_state = Some(serde_json::json!({"state": "VERIFIED"}));
        assert_ne!(LedgerService::recompute_checksum(&entry), entry.checksum);
    }

    #[test]
    fn test_scope_restriction_top_tier_sees_all() {
        let scope = LedgerService::scope_restriction_for(&ctx(ActorRole::Operator, None));
        assert!(matches!(scope, ScopeRestriction::All));

        let scope = LedgerService::scope_restriction_for(&ctx(ActorRole::SuperAdmin, None));
        assert!(matches!(scope, ScopeRestriction::All));
    }

    #[test]
    fn test_scope_restriction_tenant_admin() {
        let tenant = Uuid::new_v4();
        let actor = ctx(ActorRole::TenantAdmin, Some(tenant));
        match LedgerService::scope_restriction_for(&actor) {
            ScopeRestriction::TenantAndOwn { tenant_id, actor_id } => {
                assert_eq!(tenant_id, tenant);
                assert_eq!(actor_id, actor.actor_id);
            }
            other => panic!("unexpected scope: {:?}", other),
        }

        // 缺失租户时收紧为仅本人
        let scope = LedgerService::scope_restriction_for(&ctx(ActorRole::TenantAdmin, None));
        assert!(matches!(scope, ScopeRestriction::OwnOnly { .. }));
    }

    #[test]
    fn test_scope_restriction_subject_sees_own_only() {
        let actor = ctx(ActorRole::Student, Some(Uuid::new_v4()));
        match LedgerService::scope_restriction_for(&actor) {
            ScopeRestriction::OwnOnly { actor_id } => assert_eq!(actor_id, actor.actor_id),
            other => panic!("unexpected scope: {:?}", other),
        }
    }
}
