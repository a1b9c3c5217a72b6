//! Configuration catalog domain models
//! 原因码、转换矩阵、授权规则、漂移阈值与提权规则
//! 合并为一个带版本号的文档，变更走与业务数据相同的审计优先写路径

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::attendance::AttendanceState;
use crate::models::drift::DeviceClass;
use crate::models::role::ActorRole;

/// 原因码目录项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonCode {
    pub code: String,
    pub category: String,
    pub severity: i16,
    pub requires_justification: bool,
    pub valid_targets: Vec<AttendanceState>,
}

/// 转换矩阵的一条边集
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: AttendanceState,
    pub to: Vec<AttendanceState>,
}

/// 进入某目标状态所需的最低角色
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRule {
    pub target: AttendanceState,
    pub minimum_role: ActorRole,
}

/// 单个设备类别的漂移档位边界（秒，作用于 |drift|）
/// acceptable 是 ACCEPTABLE 档内的静默容差；
/// warning / blocked / critical 分别是对应档位的下边界
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftThresholds {
    pub device_class: DeviceClass,
    pub acceptable_secs: i64,
    pub warning_secs: i64,
    pub blocked_secs: i64,
    pub critical_secs: i64,
}

impl DriftThresholds {
    /// 边界必须严格单调，档位才互不重叠
    pub fn is_monotonic(&self) -> bool {
        self.acceptable_secs >= 0
            && self.acceptable_secs < self.warning_secs
            && self.warning_secs < self.blocked_secs
            && self.blocked_secs < self.critical_secs
    }
}

/// 提权检测规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRules {
    /// 检查 1：权限集对称差阈值
    pub permission_delta_threshold: usize,
    /// 检查 5：新授予权限数量阈值
    pub granted_permission_threshold: usize,
    /// 检查 2：最高权限角色
    pub highest_privilege_role: ActorRole,
    /// 检查 3：滑动窗口与次数上限
    pub rate_window_secs: i64,
    pub rate_threshold: i64,
    /// 检查 4：拒绝的 (from, to) 角色对
    pub denied_pairs: Vec<(ActorRole, ActorRole)>,
    /// 复核项逾期时限（秒），按优先级
    pub overdue_critical_secs: i64,
    pub overdue_high_secs: i64,
    pub overdue_normal_secs: i64,
    pub overdue_low_secs: i64,
}

/// 目录文档：所有下游组件读取的唯一配置对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub reason_codes: Vec<ReasonCode>,
    pub transition_matrix: Vec<TransitionRule>,
    pub authorization_rules: Vec<AuthorizationRule>,
    pub drift_thresholds: Vec<DriftThresholds>,
    pub escalation_rules: EscalationRules,
}

impl CatalogDocument {
    pub fn reason_code(&self, code: &str) -> Option<&ReasonCode> {
        self.reason_codes.iter().find(|rc| rc.code == code)
    }

    /// 当前状态的可达目标集合
    pub fn allowed_targets(&self, from: AttendanceState) -> Vec<AttendanceState> {
        self.transition_matrix
            .iter()
            .find(|rule| rule.from == from)
            .map(|rule| rule.to.clone())
            .unwrap_or_default()
    }

    pub fn minimum_role_for(&self, target: AttendanceState) -> Option<ActorRole> {
        self.authorization_rules
            .iter()
            .find(|rule| rule.target == target)
            .map(|rule| rule.minimum_role)
    }

    pub fn drift_thresholds_for(&self, class: DeviceClass) -> Option<&DriftThresholds> {
        self.drift_thresholds
            .iter()
            .find(|t| t.device_class == class)
    }

    /// 文档自检：发布新版本前调用
    pub fn validate_document(&self) -> Result<(), String> {
        for t in &self.drift_thresholds {
            if !t.is_monotonic() {
                return Err(format!(
                    "drift thresholds for {} are not strictly increasing",
                    t.device_class.as_str()
                ));
            }
        }
        for rc in &self.reason_codes {
            if rc.code.is_empty() {
                return Err("reason code with empty code".to_string());
            }
            if rc.valid_targets.is_empty() {
                return Err(format!("reason code {} has no valid targets", rc.code));
            }
        }
        for rule in &self.transition_matrix {
            if rule.to.contains(&rule.from) {
                return Err(format!(
                    "transition matrix allows self-loop on {}",
                    rule.from.as_str()
                ));
            }
        }
        if self.escalation_rules.rate_window_secs <= 0
            || self.escalation_rules.rate_threshold <= 0
        {
            return Err("escalation rate window and threshold must be positive".to_string());
        }
        Ok(())
    }
}

/// 目录版本行
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogVersion {
    pub version: i64,
    pub document: serde_json::Value,
    pub published_by: Uuid,
    pub justification: String,
    pub published_at: DateTime<Utc>,
}

/// 发布新目录版本请求
#[derive(Debug, Deserialize, Validate)]
pub struct PublishCatalogRequest {
    pub document: CatalogDocument,
    #[validate(length(min = 1, max = 2048))]
    pub justification: String,
}

/// 内置默认目录（版本 0），首次启动时生效
pub static DEFAULT_CATALOG: Lazy<CatalogDocument> = Lazy::new(|| CatalogDocument {
    reason_codes: vec![
        ReasonCode {
            code: "SCAN_ACCEPTED".to_string(),
            category: "capture".to_string(),
            severity: 1,
            requires_justification: false,
            valid_targets: vec![AttendanceState::Present],
        },
        ReasonCode {
            code: "NO_SHOW".to_string(),
            category: "capture".to_string(),
            severity: 1,
            requires_justification: false,
            valid_targets: vec![AttendanceState::Absent],
        },
        ReasonCode {
            code: "INSTRUCTOR_CONFIRMED".to_string(),
            category: "review".to_string(),
            severity: 1,
            requires_justification: false,
            valid_targets: vec![AttendanceState::Verified],
        },
        ReasonCode {
            code: "MANUAL_CORRECTION".to_string(),
            category: "correction".to_string(),
            severity: 2,
            requires_justification: true,
            valid_targets: vec![AttendanceState::Present, AttendanceState::Absent],
        },
        ReasonCode {
            code: "DUPLICATE_SAME_HOUR".to_string(),
            category: "anomaly".to_string(),
            severity: 3,
            requires_justification: true,
            valid_targets: vec![AttendanceState::Flagged],
        },
        ReasonCode {
            code: "DEVICE_CLOCK_SUSPECT".to_string(),
            category: "anomaly".to_string(),
            severity: 3,
            requires_justification: false,
            valid_targets: vec![AttendanceState::Flagged],
        },
        ReasonCode {
            code: "APPEAL_ACCEPTED".to_string(),
            category: "review".to_string(),
            severity: 2,
            requires_justification: true,
            valid_targets: vec![AttendanceState::Verified],
        },
        ReasonCode {
            code: "POLICY_REVOCATION".to_string(),
            category: "enforcement".to_string(),
            severity: 4,
            requires_justification: true,
            valid_targets: vec![AttendanceState::Revoked],
        },
    ],
    transition_matrix: vec![
        TransitionRule {
            from: AttendanceState::Pending,
            to: vec![AttendanceState::Present, AttendanceState::Absent],
        },
        TransitionRule {
            from: AttendanceState::Present,
            to: vec![
                AttendanceState::Verified,
                AttendanceState::Flagged,
                AttendanceState::Absent,
            ],
        },
        TransitionRule {
            from: AttendanceState::Absent,
            to: vec![AttendanceState::Present, AttendanceState::Flagged],
        },
        TransitionRule {
            from: AttendanceState::Verified,
            to: vec![AttendanceState::Flagged, AttendanceState::Revoked],
        },
        TransitionRule {
            from: AttendanceState::Flagged,
            to: vec![AttendanceState::Verified, AttendanceState::Revoked],
        },
        // REVOKED -> VERIFIED 走通用转换路径属于配置选择：
        // 默认允许这条边，但 APPEAL_ACCEPTED 原因码要求理由，
        // 且授权规则要求 Registrar 及以上
        TransitionRule {
            from: AttendanceState::Revoked,
            to: vec![AttendanceState::Verified],
        },
    ],
    authorization_rules: vec![
        AuthorizationRule {
            target: AttendanceState::Present,
            minimum_role: ActorRole::Instructor,
        },
        AuthorizationRule {
            target: AttendanceState::Absent,
            minimum_role: ActorRole::Instructor,
        },
        AuthorizationRule {
            target: AttendanceState::Verified,
            minimum_role: ActorRole::Instructor,
        },
        AuthorizationRule {
            target: AttendanceState::Flagged,
            minimum_role: ActorRole::Instructor,
        },
        AuthorizationRule {
            target: AttendanceState::Revoked,
            minimum_role: ActorRole::Registrar,
        },
    ],
    drift_thresholds: vec![
        DriftThresholds {
            device_class: DeviceClass::MobileAndroid,
            acceptable_secs: 7,
            warning_secs: 300,
            blocked_secs: 600,
            critical_secs: 3600,
        },
        DriftThresholds {
            device_class: DeviceClass::MobileIos,
            acceptable_secs: 7,
            warning_secs: 300,
            blocked_secs: 600,
            critical_secs: 3600,
        },
        DriftThresholds {
            device_class: DeviceClass::KioskTablet,
            acceptable_secs: 3,
            warning_secs: 60,
            blocked_secs: 300,
            critical_secs: 1800,
        },
        DriftThresholds {
            device_class: DeviceClass::WebBrowser,
            acceptable_secs: 15,
            warning_secs: 600,
            blocked_secs: 1200,
            critical_secs: 7200,
        },
    ],
    escalation_rules: EscalationRules {
        permission_delta_threshold: 10,
        granted_permission_threshold: 5,
        highest_privilege_role: ActorRole::SuperAdmin,
        rate_window_secs: 86_400,
        rate_threshold: 3,
        denied_pairs: vec![
            (ActorRole::Student, ActorRole::SuperAdmin),
            (ActorRole::Student, ActorRole::Operator),
            (ActorRole::Student, ActorRole::TenantAdmin),
            (ActorRole::Instructor, ActorRole::SuperAdmin),
        ],
        overdue_critical_secs: 900,
        overdue_high_secs: 3_600,
        overdue_normal_secs: 86_400,
        overdue_low_secs: 259_200,
    },
});
