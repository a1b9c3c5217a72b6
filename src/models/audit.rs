//! Audit ledger domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 审计条目可见范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditScope {
    Global,
    Tenant,
    User,
}

impl AuditScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditScope::Global => "GLOBAL",
            AuditScope::Tenant => "TENANT",
            AuditScope::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GLOBAL" => Some(AuditScope::Global),
            "TENANT" => Some(AuditScope::Tenant),
            "USER" => Some(AuditScope::User),
            _ => None,
        }
    }
}

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // 考勤相关
    RecordCreate,
    TransitionAccept,
    TransitionReject,

    // 时间权威相关
    DriftClassify,
    DriftIncident,

    // 角色变更相关
    EscalationEvaluate,
    RevalidationEnqueue,
    RevalidationResolve,
    RevalidationOverdue,

    // 账本自身相关
    LedgerAppend,
    LedgerQuery,
    LedgerVerify,
    IntegrityIncident,

    // 配置目录相关
    CatalogPublish,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RecordCreate => "attendance.record.create",
            AuditAction::TransitionAccept => "attendance.transition.accept",
            AuditAction::TransitionReject => "attendance.transition.reject",

            AuditAction::DriftClassify => "time.drift.classify",
            AuditAction::DriftIncident => "time.drift.incident",

            AuditAction::EscalationEvaluate => "escalation.evaluate",
            AuditAction::RevalidationEnqueue => "revalidation.enqueue",
            AuditAction::RevalidationResolve => "revalidation.resolve",
            AuditAction::RevalidationOverdue => "revalidation.overdue",

            AuditAction::LedgerAppend => "ledger.append",
            AuditAction::LedgerQuery => "ledger.query",
            AuditAction::LedgerVerify => "ledger.verify",
            AuditAction::IntegrityIncident => "ledger.integrity_incident",

            AuditAction::CatalogPublish => "catalog.publish",
        }
    }
}

/// 审计条目（插入后不可变，永久保留）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: String,
    pub action: String,
    pub scope_type: String,
    pub scope_id: Option<Uuid>,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub justification: Option<String>,
    pub trace_id: Option<String>,
    pub source_ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub checksum: String,
}

/// 待追加的审计条目（checksum 在写入时计算）
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Uuid,
    pub actor_role: String,
    pub action: AuditAction,
    pub scope: AuditScope,
    pub scope_id: Option<Uuid>,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub justification: Option<String>,
    pub trace_id: Option<String>,
    pub source_ip: Option<String>,
}

/// 外部协作方追加领域事件的请求
/// action 必须是点分层级名（如 "roster.sync.apply"）
#[derive(Debug, Clone, Deserialize, validator::Validate)]
pub struct ExternalAppendRequest {
    #[validate(length(min = 3, max = 128))]
    pub action: String,
    pub scope: AuditScope,
    pub scope_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    #[validate(length(max = 2048))]
    pub justification: Option<String>,
}

/// 审计查询过滤条件
#[derive(Debug, Default, Deserialize)]
pub struct AuditEntryFilters {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// 校验结果
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifyOutcome {
    Valid,
    Mismatch,
}

/// 完整性事件（校验失败时追加，条目本身冻结待查，绝不修复或删除）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IntegrityIncident {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub stored_checksum: String,
    pub computed_checksum: String,
    pub detected_by: String,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_strings() {
        assert_eq!(AuditAction::RecordCreate.as_str(), "attendance.record.create");
        assert_eq!(AuditAction::TransitionAccept.as_str(), "attendance.transition.accept");
        assert_eq!(AuditAction::TransitionReject.as_str(), "attendance.transition.reject");
        assert_eq!(AuditAction::DriftClassify.as_str(), "time.drift.classify");
        assert_eq!(AuditAction::LedgerQuery.as_str(), "ledger.query");
        assert_eq!(AuditAction::CatalogPublish.as_str(), "catalog.publish");
    }

    #[test]
    fn test_audit_action_coverage() {
        let actions = [
            AuditAction::RecordCreate,
            AuditAction::TransitionAccept,
            AuditAction::TransitionReject,
            AuditAction::DriftClassify,
            AuditAction::DriftIncident,
            AuditAction::EscalationEvaluate,
            AuditAction::RevalidationEnqueue,
            AuditAction::RevalidationResolve,
            AuditAction::RevalidationOverdue,
            AuditAction::LedgerAppend,
            AuditAction::LedgerQuery,
            AuditAction::LedgerVerify,
            AuditAction::IntegrityIncident,
            AuditAction::CatalogPublish,
        ];

        for action in actions {
            let s = action.as_str();
            assert!(!s.is_empty());
            assert!(s.contains('.'));
        }
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in [AuditScope::Global, AuditScope::Tenant, AuditScope::User] {
            assert_eq!(AuditScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(AuditScope::parse("OTHER"), None);
    }
}
