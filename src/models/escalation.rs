//! Escalation detector domain models
//! 角色变更事件、五项独立启发式与复核队列

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::role::ActorRole;

/// 提权严重度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Severity::None),
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// 五项启发式检查的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationCheck {
    PermissionDeltaExceeded,
    HighestPrivilegeTarget,
    ChangeRateExceeded,
    RolePairDenied,
    GrantedPermissionsExceeded,
}

impl EscalationCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationCheck::PermissionDeltaExceeded => "PERMISSION_DELTA_EXCEEDED",
            EscalationCheck::HighestPrivilegeTarget => "HIGHEST_PRIVILEGE_TARGET",
            EscalationCheck::ChangeRateExceeded => "CHANGE_RATE_EXCEEDED",
            EscalationCheck::RolePairDenied => "ROLE_PAIR_DENIED",
            EscalationCheck::GrantedPermissionsExceeded => "GRANTED_PERMISSIONS_EXCEEDED",
        }
    }
}

/// 五项检查的输入信号
/// 严重度由一个独立纯函数在此结构上计算，所有调用点共享同一实现
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationSignals {
    /// 权限集对称差大小
    pub permission_delta: usize,
    /// 新授予权限数量
    pub granted_permissions: usize,
    /// 目标是否为最高权限角色
    pub targets_highest_role: bool,
    /// 滑动窗口内该用户的角色变更次数（含本次之前的历史）
    pub recent_changes: i64,
    /// (from, to) 是否命中拒绝规则表
    pub pair_denied: bool,
}

/// 角色变更事件（插入后不可变）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoleChangeEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub previous_role: String,
    pub new_role: String,
    pub actor_id: Uuid,
    pub actor_role: String,
    pub triggered_checks: serde_json::Value,
    pub severity: String,
    pub requires_revalidation: bool,
    pub sessions_marked_invalid: bool,
    pub occurred_at: DateTime<Utc>,
}

/// 复核队列优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueuePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePriority::Low => "LOW",
            QueuePriority::Normal => "NORMAL",
            QueuePriority::High => "HIGH",
            QueuePriority::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(QueuePriority::Low),
            "NORMAL" => Some(QueuePriority::Normal),
            "HIGH" => Some(QueuePriority::High),
            "CRITICAL" => Some(QueuePriority::Critical),
            _ => None,
        }
    }
}

/// 复核项处置状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Valid,
    Invalid,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Valid => "VALID",
            QueueStatus::Invalid => "INVALID",
        }
    }
}

/// 复核队列项（只有处置字段可变，由存储层约束保证）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RevalidationQueueItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Option<Uuid>,
    pub priority: String,
    pub reason: String,
    pub status: String,
    pub enqueued_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolution_note: Option<String>,
}

/// 提权评估请求
/// 权限集由外部身份服务提供，本核心不拥有权限目录
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EvaluateEscalationRequest {
    pub user_id: Uuid,
    pub from_role: ActorRole,
    pub to_role: ActorRole,
    #[validate(length(max = 512))]
    pub from_permissions: Vec<String>,
    #[validate(length(max = 512))]
    pub to_permissions: Vec<String>,
}

/// 提权评估结论
#[derive(Debug, Clone, Serialize)]
pub struct EscalationVerdict {
    pub event_id: Uuid,
    pub severity: Severity,
    pub triggered_checks: Vec<EscalationCheck>,
    pub requires_revalidation: bool,
    pub sessions_marked_invalid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<Uuid>,
}

/// 复核项处置请求
#[derive(Debug, Deserialize, Validate)]
pub struct ResolveRevalidationRequest {
    pub status: QueueStatus,
    #[validate(length(max = 2048))]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::None < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_roundtrip() {
        for sev in [
            Severity::None,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(sev.as_str()), Some(sev));
        }
    }

    #[test]
    fn test_priority_ordering_matches_urgency() {
        assert!(QueuePriority::Critical > QueuePriority::High);
        assert!(QueuePriority::High > QueuePriority::Normal);
        assert!(QueuePriority::Normal > QueuePriority::Low);
    }
}
