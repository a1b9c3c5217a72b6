//! 提权检测服务
//!
//! 审计优先、失败关闭：结论与角色变更事件先落库，
//! 落库失败则角色变更一并失败。高危结论入复核队列，
//! 新权限在复核通过（VALID）之前一律扣留。

use chrono::{Duration, SubsecRound, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::identity::ActorContext;
use crate::models::audit::{AuditAction, AuditScope, NewAuditEntry};
use crate::models::catalog::EscalationRules;
use crate::models::escalation::*;
use crate::models::role::ActorRole;
use crate::repository::escalation_repo::{EscalationRepository, QueueFilters};
use crate::services::catalog_service::CatalogService;
use crate::services::ledger_service::LedgerService;

/// 由请求与规则构造五项信号
pub fn build_signals(
    from_role: ActorRole,
    to_role: ActorRole,
    from_permissions: &[String],
    to_permissions: &[String],
    recent_changes: i64,
    rules: &EscalationRules,
) -> EscalationSignals {
    let from: HashSet<&str> = from_permissions.iter().map(String::as_str).collect();
    let to: HashSet<&str> = to_permissions.iter().map(String::as_str).collect();

    EscalationSignals {
        permission_delta: from.symmetric_difference(&to).count(),
        granted_permissions: to.difference(&from).count(),
        targets_highest_role: to_role == rules.highest_privilege_role,
        recent_changes,
        pair_denied: rules
            .denied_pairs
            .iter()
            .any(|(f, t)| *f == from_role && *t == to_role),
    }
}

/// 五项检查合成严重度，取最大值
/// 单一纯函数：所有调用点共享同一实现，可独立单测
pub fn evaluate_signals(
    signals: &EscalationSignals,
    rules: &EscalationRules,
) -> (Severity, Vec<EscalationCheck>) {
    let mut severity = Severity::None;
    let mut triggered = Vec::new();

    let mut hit = |check: EscalationCheck, level: Severity| {
        triggered.push(check);
        if level > severity {
            severity = level;
        }
    };

    if signals.permission_delta >= rules.permission_delta_threshold {
        hit(EscalationCheck::PermissionDeltaExceeded, Severity::Medium);
    }
    if signals.targets_highest_role {
        hit(EscalationCheck::HighestPrivilegeTarget, Severity::Critical);
    }
    if signals.recent_changes >= rules.rate_threshold {
        hit(EscalationCheck::ChangeRateExceeded, Severity::High);
    }
    if signals.pair_denied {
        hit(EscalationCheck::RolePairDenied, Severity::High);
    }
    if signals.granted_permissions >= rules.granted_permission_threshold {
        hit(EscalationCheck::GrantedPermissionsExceeded, Severity::Medium);
    }

    (severity, triggered)
}

/// HIGH/CRITICAL 结论需要复核后新权限才能生效
pub fn requires_revalidation(severity: Severity) -> bool {
    severity >= Severity::High
}

fn queue_priority_for(severity: Severity) -> QueuePriority {
    match severity {
        Severity::Critical => QueuePriority::Critical,
        _ => QueuePriority::High,
    }
}

pub struct EscalationService {
    db: PgPool,
    ledger: Arc<LedgerService>,
    catalog: Arc<CatalogService>,
    store_timeout: std::time::Duration,
}

impl EscalationService {
    pub fn new(
        db: PgPool,
        ledger: Arc<LedgerService>,
        catalog: Arc<CatalogService>,
        store_timeout: std::time::Duration,
    ) -> Self {
        Self {
            db,
            ledger,
            catalog,
            store_timeout,
        }
    }

    /// 评估一次角色变更请求
    /// 返回前结论已持久化；调用服务在此之前不得应用变更
    #[instrument(skip(self, actor, request), fields(user_id = %request.user_id))]
    pub async fn evaluate(
        &self,
        actor: &ActorContext,
        request: EvaluateEscalationRequest,
    ) -> Result<EscalationVerdict, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let doc = self.catalog.current().await;
        let rules = &doc.escalation_rules;
        let now = Utc::now().trunc_subsecs(6);

        let repo = EscalationRepository::new(self.db.clone());

        // 速率检查要求一致读：窗口计数直接来自已提交的事件行
        let since = now - Duration::seconds(rules.rate_window_secs);
        let recent_changes = repo.count_recent_changes(request.user_id, since).await?;

        let signals = build_signals(
            request.from_role,
            request.to_role,
            &request.from_permissions,
            &request.to_permissions,
            recent_changes,
            rules,
        );
        let (severity, triggered) = evaluate_signals(&signals, rules);
        let needs_revalidation = requires_revalidation(severity);

        let event_id = Uuid::new_v4();
        let triggered_strs: Vec<&str> = triggered.iter().map(|c| c.as_str()).collect();

        let event = RoleChangeEvent {
            id: event_id,
            user_id: request.user_id,
            previous_role: request.from_role.as_str().to_string(),
            new_role: request.to_role.as_str().to_string(),
            actor_id: actor.actor_id,
            actor_role: actor.role.as_str().to_string(),
            triggered_checks: serde_json::json!(&triggered_strs),
            severity: severity.as_str().to_string(),
            requires_revalidation: needs_revalidation,
            sessions_marked_invalid: needs_revalidation,
            occurred_at: now,
        };

        let queue_item = if needs_revalidation {
            Some(RevalidationQueueItem {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                event_id: Some(event_id),
                priority: queue_priority_for(severity).as_str().to_string(),
                reason: format!(
                    "escalation {} -> {} scored {}",
                    request.from_role.as_str(),
                    request.to_role.as_str(),
                    severity.as_str()
                ),
                status: QueueStatus::Pending.as_str().to_string(),
                enqueued_at: now,
                resolved_at: None,
                resolved_by: None,
                resolution_note: None,
            })
        } else {
            None
        };

        let work = async {
            let mut tx = self.db.begin().await?;

            EscalationRepository::insert_event_tx(&mut tx, &event).await?;

            LedgerService::append_in_tx(
                &mut tx,
                NewAuditEntry {
                    actor_id: actor.actor_id,
                    actor_role: actor.role.as_str().to_string(),
                    action: AuditAction::EscalationEvaluate,
                    scope: AuditScope::User,
                    scope_id: Some(request.user_id),
                    resource_type: "role_change_event".to_string(),
                    resource_id: Some(event_id),
                    before_state: Some(serde_json::json!({"role": request.from_role.as_str()})),
                    after_state: Some(serde_json::json!({
                        "role": request.to_role.as_str(),
                        "severity": severity.as_str(),
                        "triggered_checks": &triggered_strs,
                        "requires_revalidation": needs_revalidation,
                    })),
                    justification: None,
                    trace_id: None,
                    source_ip: None,
                },
            )
            .await?;

            if let Some(item) = &queue_item {
                EscalationRepository::insert_queue_item_tx(&mut tx, item).await?;

                LedgerService::append_in_tx(
                    &mut tx,
                    NewAuditEntry {
                        actor_id: actor.actor_id,
                        actor_role: actor.role.as_str().to_string(),
                        action: AuditAction::RevalidationEnqueue,
                        scope: AuditScope::User,
                        scope_id: Some(request.user_id),
                        resource_type: "revalidation_queue_item".to_string(),
                        resource_id: Some(item.id),
                        before_state: None,
                        after_state: Some(serde_json::json!({
                            "priority": &item.priority,
                            "reason": &item.reason,
                        })),
                        justification: None,
                        trace_id: None,
                        source_ip: None,
                    },
                )
                .await?;
            }

            tx.commit().await?;
            Ok::<(), AppError>(())
        };

        // 失败关闭：持久化失败则评估失败，角色变更不得生效
        match tokio::time::timeout(self.store_timeout, work).await {
            Ok(result) => result?,
            Err(_) => return Err(AppError::Timeout("escalation verdict persist".to_string())),
        }

        metrics::counter!("escalation.evaluated", "severity" => severity.as_str()).increment(1);

        if needs_revalidation {
            warn!(
                user_id = %request.user_id,
                severity = severity.as_str(),
                "Escalation requires revalidation, permissions withheld"
            );
        } else {
            info!(user_id = %request.user_id, severity = severity.as_str(), "Escalation evaluated");
        }

        Ok(EscalationVerdict {
            event_id,
            severity,
            triggered_checks: triggered,
            requires_revalidation: needs_revalidation,
            sessions_marked_invalid: needs_revalidation,
            queue_item_id: queue_item.map(|i| i.id),
        })
    }

    /// 角色变更当前是否可以生效
    /// 需要复核的变更只有在对应队列项处置为 VALID 后才放行
    pub async fn is_change_applicable(&self, event_id: Uuid) -> Result<bool, AppError> {
        let repo = EscalationRepository::new(self.db.clone());

        let event = repo
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("role change event".to_string()))?;

        if !event.requires_revalidation {
            return Ok(true);
        }

        let item = repo.find_queue_item_by_event(event_id).await?;
        Ok(matches!(
            item.map(|i| i.status),
            Some(status) if status == QueueStatus::Valid.as_str()
        ))
    }

    pub async fn list_queue(
        &self,
        filters: &QueueFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RevalidationQueueItem>, AppError> {
        EscalationRepository::new(self.db.clone())
            .list_queue_items(filters, limit, offset)
            .await
    }

    /// 处置复核项（VALID / INVALID），处置本身追加审计
    #[instrument(skip(self, actor, request))]
    pub async fn resolve_queue_item(
        &self,
        actor: &ActorContext,
        item_id: Uuid,
        request: ResolveRevalidationRequest,
    ) -> Result<RevalidationQueueItem, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        actor.require_role(ActorRole::Operator)?;

        if request.status == QueueStatus::Pending {
            return Err(AppError::Validation(
                "resolution status must be VALID or INVALID".to_string(),
            ));
        }

        let repo = EscalationRepository::new(self.db.clone());
        let item = repo
            .find_queue_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound("revalidation queue item".to_string()))?;

        // 职责分离：被复核的用户不得处置自己的复核项
        if item.user_id == actor.actor_id {
            return Err(AppError::PolicyViolation(
                "cannot resolve a revalidation item about yourself".to_string(),
            ));
        }

        let now = Utc::now().trunc_subsecs(6);

        let mut tx = self.db.begin().await?;

        let rows = EscalationRepository::resolve_queue_item_tx(
            &mut tx,
            item_id,
            request.status.as_str(),
            actor.actor_id,
            &request.note,
            now,
        )
        .await?;

        if rows == 0 {
            return Err(AppError::Conflict(format!(
                "queue item {} is already resolved",
                item_id
            )));
        }

        LedgerService::append_in_tx(
            &mut tx,
            NewAuditEntry {
                actor_id: actor.actor_id,
                actor_role: actor.role.as_str().to_string(),
                action: AuditAction::RevalidationResolve,
                scope: AuditScope::User,
                scope_id: Some(item.user_id),
                resource_type: "revalidation_queue_item".to_string(),
                resource_id: Some(item_id),
                before_state: Some(serde_json::json!({"status": item.status})),
                after_state: Some(serde_json::json!({"status": request.status.as_str()})),
                justification: request.note.clone(),
                trace_id: None,
                source_ip: None,
            },
        )
        .await?;

        tx.commit().await?;

        metrics::counter!("revalidation.resolved", "status" => request.status.as_str())
            .increment(1);
        info!(item_id = %item_id, status = request.status.as_str(), "Revalidation item resolved");

        repo.find_queue_item(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound("revalidation queue item".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::DEFAULT_CATALOG;

    fn rules() -> EscalationRules {
        DEFAULT_CATALOG.escalation_rules.clone()
    }

    fn perms(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("perm.{}", i)).collect()
    }

    #[test]
    fn test_no_signals_scores_none() {
        let signals = build_signals(
            ActorRole::Instructor,
            ActorRole::Registrar,
            &perms(3),
            &perms(4),
            0,
            &rules(),
        );
        let (severity, triggered) = evaluate_signals(&signals, &rules());
        assert_eq!(severity, Severity::None);
        assert!(triggered.is_empty());
        assert!(!requires_revalidation(severity));
    }

    #[test]
    fn test_direct_jump_to_highest_role_is_critical() {
        // STUDENT -> SUPERADMIN：最高权限角色直跳
        let signals = build_signals(
            ActorRole::Student,
            ActorRole::SuperAdmin,
            &perms(2),
            &perms(3),
            0,
            &rules(),
        );
        let (severity, triggered) = evaluate_signals(&signals, &rules());
        assert_eq!(severity, Severity::Critical);
        assert!(triggered.contains(&EscalationCheck::HighestPrivilegeTarget));
        // 默认规则表同时命中拒绝角色对
        assert!(triggered.contains(&EscalationCheck::RolePairDenied));
        assert!(requires_revalidation(severity));
    }

    #[test]
    fn test_denied_pair_is_high() {
        let signals = build_signals(
            ActorRole::Student,
            ActorRole::TenantAdmin,
            &perms(2),
            &perms(3),
            0,
            &rules(),
        );
        let (severity, triggered) = evaluate_signals(&signals, &rules());
        assert_eq!(severity, Severity::High);
        assert_eq!(triggered, vec![EscalationCheck::RolePairDenied]);
    }

    #[test]
    fn test_rate_check() {
        let r = rules();
        let below = build_signals(
            ActorRole::Instructor,
            ActorRole::Registrar,
            &perms(2),
            &perms(2),
            r.rate_threshold - 1,
            &r,
        );
        assert_eq!(evaluate_signals(&below, &r).0, Severity::None);

        let at = build_signals(
            ActorRole::Instructor,
            ActorRole::Registrar,
            &perms(2),
            &perms(2),
            r.rate_threshold,
            &r,
        );
        let (severity, triggered) = evaluate_signals(&at, &r);
        assert_eq!(severity, Severity::High);
        assert_eq!(triggered, vec![EscalationCheck::ChangeRateExceeded]);
    }

    #[test]
    fn test_permission_delta_and_grant_thresholds() {
        let r = rules();
        // 新授予数量单独越限
        let granted_only = EscalationSignals {
            permission_delta: 0,
            granted_permissions: r.granted_permission_threshold,
            targets_highest_role: false,
            recent_changes: 0,
            pair_denied: false,
        };
        let (severity, triggered) = evaluate_signals(&granted_only, &r);
        assert_eq!(severity, Severity::Medium);
        assert!(triggered.contains(&EscalationCheck::GrantedPermissionsExceeded));

        // 对称差越限
        let delta_only = EscalationSignals {
            permission_delta: r.permission_delta_threshold,
            granted_permissions: 0,
            targets_highest_role: false,
            recent_changes: 0,
            pair_denied: false,
        };
        let (severity, triggered) = evaluate_signals(&delta_only, &r);
        assert_eq!(severity, Severity::Medium);
        assert!(triggered.contains(&EscalationCheck::PermissionDeltaExceeded));
    }

    #[test]
    fn test_severity_is_monotonic_in_delta() {
        // 加宽权限差永不降低严重度
        let r = rules();
        let mut last = Severity::None;
        for delta in 0..(r.permission_delta_threshold + 5) {
            let signals = EscalationSignals {
                permission_delta: delta,
                granted_permissions: 0,
                targets_highest_role: false,
                recent_changes: 0,
                pair_denied: false,
            };
            let (severity, _) = evaluate_signals(&signals, &r);
            assert!(severity >= last);
            last = severity;
        }
    }

    #[test]
    fn test_severity_is_monotonic_when_adding_violations() {
        let r = rules();
        let base = EscalationSignals {
            permission_delta: r.permission_delta_threshold,
            granted_permissions: 0,
            targets_highest_role: false,
            recent_changes: 0,
            pair_denied: false,
        };
        let (base_sev, _) = evaluate_signals(&base, &r);

        let mut worse = base;
        worse.pair_denied = true;
        let (worse_sev, _) = evaluate_signals(&worse, &r);
        assert!(worse_sev >= base_sev);

        let mut worst = worse;
        worst.targets_highest_role = true;
        let (worst_sev, _) = evaluate_signals(&worst, &r);
        assert!(worst_sev >= worse_sev);
        assert_eq!(worst_sev, Severity::Critical);
    }

    #[test]
    fn test_signal_building_counts_sets_not_lists() {
        let from = vec!["a".to_string(), "b".to_string(), "b".to_string()];
        let to = vec!["b".to_string(), "c".to_string(), "d".to_string()];
        let signals = build_signals(
            ActorRole::Instructor,
            ActorRole::Registrar,
            &from,
            &to,
            0,
            &rules(),
        );
        // 对称差 {a, c, d}，新授予 {c, d}
        assert_eq!(signals.permission_delta, 3);
        assert_eq!(signals.granted_permissions, 2);
    }

    #[test]
    fn test_queue_priority_mapping() {
        assert_eq!(queue_priority_for(Severity::Critical), QueuePriority::Critical);
        assert_eq!(queue_priority_for(Severity::High), QueuePriority::High);
    }
}
