//! 状态转换校验服务
//!
//! 考勤状态机的唯一写入口。接受与拒绝都会留下转换尝试行；
//! 接受时状态推进、尝试行与审计条目在同一事务内提交。
//! 同一记录的并发尝试由记录级锁串行化，抢不到锁直接拒绝重试，
//! 绝不静默合并。

use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::checksum;
use crate::error::AppError;
use crate::identity::ActorContext;
use crate::models::attendance::*;
use crate::models::audit::{AuditAction, AuditScope, NewAuditEntry};
use crate::models::catalog::CatalogDocument;
use crate::repository::attendance_repo::AttendanceRepository;
use crate::services::catalog_service::CatalogService;
use crate::services::ledger_service::LedgerService;

/// 策略拒绝：机器可读原因码加细节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRejection {
    pub code: &'static str,
    pub detail: String,
}

/// 四步策略检查，顺序固定：
/// (a) 矩阵可达 (b) 原因码允许该目标 (c) 需要理由时理由必须在场
/// (d) 执行者角色达标且不得转换自己的记录
pub fn check_transition_policy(
    doc: &CatalogDocument,
    current: AttendanceState,
    target: AttendanceState,
    reason_code: &str,
    justification: Option<&str>,
    actor: &ActorContext,
    subject_id: Uuid,
) -> Result<(), PolicyRejection> {
    let allowed = doc.allowed_targets(current);
    if !allowed.contains(&target) {
        return Err(PolicyRejection {
            code: rejection::TARGET_NOT_REACHABLE,
            detail: format!(
                "{} is not reachable from {}",
                target.as_str(),
                current.as_str()
            ),
        });
    }

    let code_entry = doc.reason_code(reason_code).ok_or_else(|| PolicyRejection {
        code: rejection::REASON_CODE_UNKNOWN,
        detail: format!("unknown reason code {}", reason_code),
    })?;

    if !code_entry.valid_targets.contains(&target) {
        return Err(PolicyRejection {
            code: rejection::REASON_NOT_PERMITTED_FOR_TARGET,
            detail: format!(
                "reason code {} does not permit target {}",
                reason_code,
                target.as_str()
            ),
        });
    }

    if code_entry.requires_justification
        && justification.map(str::trim).map_or(true, str::is_empty)
    {
        return Err(PolicyRejection {
            code: rejection::JUSTIFICATION_REQUIRED,
            detail: format!("reason code {} requires a justification", reason_code),
        });
    }

    // 记录主体不得转换自己的记录，任何角色都不例外
    if actor.actor_id == subject_id {
        return Err(PolicyRejection {
            code: rejection::ACTOR_NOT_AUTHORIZED,
            detail: "actor is the subject of this record".to_string(),
        });
    }

    match doc.minimum_role_for(target) {
        Some(min) if actor.role.rank() >= min.rank() => Ok(()),
        Some(min) => Err(PolicyRejection {
            code: rejection::ACTOR_NOT_AUTHORIZED,
            detail: format!(
                "role {} may not drive transitions into {} (requires {})",
                actor.role.as_str(),
                target.as_str(),
                min.as_str()
            ),
        }),
        None => Err(PolicyRejection {
            code: rejection::ACTOR_NOT_AUTHORIZED,
            detail: format!("no authorization rule for target {}", target.as_str()),
        }),
    }
}

pub struct TransitionService {
    db: PgPool,
    catalog: Arc<CatalogService>,
    // 每个记录键一个权威写入者
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    store_timeout: Duration,
}

impl TransitionService {
    pub fn new(db: PgPool, catalog: Arc<CatalogService>, store_timeout: Duration) -> Self {
        Self {
            db,
            catalog,
            locks: DashMap::new(),
            store_timeout,
        }
    }

    fn record_lock(&self, record_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(record_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 创建考勤记录（初始 PENDING），记录行与审计条目同事务提交
    #[instrument(skip(self, actor, request))]
    pub async fn create_record(
        &self,
        actor: &ActorContext,
        request: CreateRecordRequest,
    ) -> Result<AttendanceRecord, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        actor.require_role(crate::models::role::ActorRole::Instructor)?;

        let now = Utc::now().trunc_subsecs(6);
        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            subject_id: request.subject_id,
            session_id: request.session_id,
            tenant_id: request.tenant_id,
            current_state: AttendanceState::Pending.as_str().to_string(),
            last_attempt_id: None,
            created_at: now,
            updated_at: now,
        };

        let work = async {
            let mut tx = self.db.begin().await?;

            AttendanceRepository::insert_record_tx(&mut tx, &record).await?;

            LedgerService::append_in_tx(
                &mut tx,
                NewAuditEntry {
                    actor_id: actor.actor_id,
                    actor_role: actor.role.as_str().to_string(),
                    action: AuditAction::RecordCreate,
                    scope: AuditScope::Tenant,
                    scope_id: Some(record.tenant_id),
                    resource_type: "attendance_record".to_string(),
                    resource_id: Some(record.id),
                    before_state: None,
                    after_state: Some(serde_json::json!({
                        "state": record.current_state,
                        "subject_id": record.subject_id,
                        "session_id": record.session_id,
                    })),
                    justification: None,
                    trace_id: None,
                    source_ip: None,
                },
            )
            .await?;

            tx.commit().await?;
            Ok::<(), AppError>(())
        };

        self.bounded(work).await?;

        info!(record_id = %record.id, "Attendance record created");
        Ok(record)
    }

    pub async fn get_record(&self, record_id: Uuid) -> Result<AttendanceRecord, AppError> {
        AttendanceRepository::new(self.db.clone())
            .find_record(record_id)
            .await?
            .ok_or_else(|| AppError::NotFound("attendance record".to_string()))
    }

    pub async fn list_attempts(
        &self,
        record_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransitionAttempt>, AppError> {
        AttendanceRepository::new(self.db.clone())
            .list_attempts(record_id, limit, offset)
            .await
    }

    /// 尝试一次状态转换
    ///
    /// 幂等：同 (记录, 幂等键, 目标) 的重复提交只产生一次状态效果，
    /// 但每次提交都会留下自己的尝试行，重复提交模式保持可取证。
    #[instrument(skip(self, actor, request), fields(record_id = %record_id))]
    pub async fn attempt_transition(
        &self,
        actor: &ActorContext,
        record_id: Uuid,
        request: TransitionRequest,
    ) -> Result<TransitionResponse, AppError> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        // 单记录串行化：抢不到锁的并发写入者立即失败，由调用方重试
        let lock = self.record_lock(record_id);
        let _guard = lock.try_lock().map_err(|_| {
            AppError::Conflict(format!("record {} has a transition in flight", record_id))
        })?;

        let repo = AttendanceRepository::new(self.db.clone());

        let record = repo
            .find_record(record_id)
            .await?
            .ok_or_else(|| AppError::NotFound("attendance record".to_string()))?;

        let current = AttendanceState::parse(&record.current_state).ok_or_else(|| {
            AppError::Integrity(format!(
                "record {} carries unknown state {}",
                record.id, record.current_state
            ))
        })?;

        let target = request.target_state;
        let now = Utc::now().trunc_subsecs(6);

        // 幂等短路：已接受过同一逻辑事件
        if let Some(original) = repo
            .find_accepted_by_idempotency(record_id, &request.idempotency_key, target.as_str())
            .await?
        {
            let attempt = self.build_attempt(
                &record,
                current,
                target,
                &request,
                actor,
                AttemptOutcome::Accepted,
                None,
                Some(original.id),
                now,
            );
            self.bounded(repo.insert_attempt(&attempt)).await?;

            metrics::counter!("attendance.transition.duplicate").increment(1);
            info!(
                attempt_id = %attempt.id,
                original = %original.id,
                "Duplicate submission collapsed onto original attempt"
            );

            return Ok(TransitionResponse {
                attempt_id: attempt.id,
                outcome: AttemptOutcome::Accepted,
                new_state: Some(current),
                rejection_reason: None,
                valid_targets: None,
                duplicate_of: Some(original.id),
            });
        }

        let doc = self.catalog.current().await;

        // 策略拒绝也是历史：尝试行照常落库
        if let Err(rejection) = check_transition_policy(
            &doc,
            current,
            target,
            &request.reason_code,
            request.justification.as_deref(),
            actor,
            record.subject_id,
        ) {
            let attempt = self.build_attempt(
                &record,
                current,
                target,
                &request,
                actor,
                AttemptOutcome::Rejected,
                Some(rejection.code.to_string()),
                None,
                now,
            );

            let work = async {
                let mut tx = self.db.begin().await?;

                AttendanceRepository::insert_attempt_tx(&mut tx, &attempt).await?;

                LedgerService::append_in_tx(
                    &mut tx,
                    NewAuditEntry {
                        actor_id: actor.actor_id,
                        actor_role: actor.role.as_str().to_string(),
                        action: AuditAction::TransitionReject,
                        scope: AuditScope::Tenant,
                        scope_id: Some(record.tenant_id),
                        resource_type: "attendance_record".to_string(),
                        resource_id: Some(record.id),
                        before_state: Some(serde_json::json!({"state": current.as_str()})),
                        after_state: Some(serde_json::json!({
                            "state": current.as_str(),
                            "rejected_target": target.as_str(),
                            "rejection_reason": rejection.code,
                        })),
                        justification: request.justification.clone(),
                        trace_id: None,
                        source_ip: None,
                    },
                )
                .await?;

                tx.commit().await?;
                Ok::<(), AppError>(())
            };
            self.bounded(work).await?;

            metrics::counter!("attendance.transition.rejected", "code" => rejection.code)
                .increment(1);
            warn!(
                record_id = %record_id,
                code = rejection.code,
                detail = %rejection.detail,
                "Transition rejected"
            );

            return Ok(TransitionResponse {
                attempt_id: attempt.id,
                outcome: AttemptOutcome::Rejected,
                new_state: None,
                rejection_reason: Some(rejection.code.to_string()),
                valid_targets: Some(doc.allowed_targets(current)),
                duplicate_of: None,
            });
        }

        // 接受：状态推进 + 尝试行 + 审计条目，一个原子单元
        let attempt = self.build_attempt(
            &record,
            current,
            target,
            &request,
            actor,
            AttemptOutcome::Accepted,
            None,
            None,
            now,
        );

        let work = async {
            let mut tx = self.db.begin().await?;

            let rows = AttendanceRepository::advance_state_tx(
                &mut tx,
                record.id,
                current.as_str(),
                target.as_str(),
                attempt.id,
                now,
            )
            .await?;

            if rows == 0 {
                // 跨进程竞争者抢先推进了状态
                return Err(AppError::Conflict(format!(
                    "record {} changed concurrently, retry",
                    record.id
                )));
            }

            AttendanceRepository::insert_attempt_tx(&mut tx, &attempt).await?;

            LedgerService::append_in_tx(
                &mut tx,
                NewAuditEntry {
                    actor_id: actor.actor_id,
                    actor_role: actor.role.as_str().to_string(),
                    action: AuditAction::TransitionAccept,
                    scope: AuditScope::Tenant,
                    scope_id: Some(record.tenant_id),
                    resource_type: "attendance_record".to_string(),
                    resource_id: Some(record.id),
                    before_state: Some(serde_json::json!({"state": current.as_str()})),
                    after_state: Some(serde_json::json!({"state": target.as_str()})),
                    justification: request.justification.clone(),
                    trace_id: None,
                    source_ip: None,
                },
            )
            .await?;

            tx.commit().await?;
            Ok::<(), AppError>(())
        };

        self.bounded(work).await?;

        metrics::counter!("attendance.transition.accepted").increment(1);
        info!(
            record_id = %record.id,
            attempt_id = %attempt.id,
            from = current.as_str(),
            to = target.as_str(),
            "Transition accepted"
        );

        Ok(TransitionResponse {
            attempt_id: attempt.id,
            outcome: AttemptOutcome::Accepted,
            new_state: Some(target),
            rejection_reason: None,
            valid_targets: None,
            duplicate_of: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_attempt(
        &self,
        record: &AttendanceRecord,
        from: AttendanceState,
        to: AttendanceState,
        request: &TransitionRequest,
        actor: &ActorContext,
        outcome: AttemptOutcome,
        rejection_reason: Option<String>,
        duplicate_of: Option<Uuid>,
        occurred_at: chrono::DateTime<Utc>,
    ) -> TransitionAttempt {
        let id = Uuid::new_v4();
        let checksum = checksum::transition_attempt_checksum(
            record.id,
            from.as_str(),
            to.as_str(),
            &request.reason_code,
            outcome.as_str(),
            &rejection_reason,
            actor.actor_id,
            &request.idempotency_key,
            &occurred_at,
        );

        TransitionAttempt {
            id,
            record_id: record.id,
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
            reason_code: request.reason_code.clone(),
            justification: request.justification.clone(),
            outcome: outcome.as_str().to_string(),
            rejection_reason,
            duplicate_of,
            actor_id: actor.actor_id,
            actor_role: actor.role.as_str().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            client_context: request.client_context.clone(),
            occurred_at,
            checksum,
        }
    }

    /// 有界存储等待：超时按失败关闭处理，调用方可带同一幂等键重试
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout("attendance store write".to_string())),
        }
    }
}
