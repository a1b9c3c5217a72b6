//! Attendance domain models
//! 考勤记录与状态转换尝试

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 考勤状态机的状态集合
/// 可达边由配置目录中的转换矩阵决定，这里只定义状态本身
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceState {
    Pending,
    Present,
    Absent,
    Verified,
    Flagged,
    Revoked,
}

impl AttendanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceState::Pending => "PENDING",
            AttendanceState::Present => "PRESENT",
            AttendanceState::Absent => "ABSENT",
            AttendanceState::Verified => "VERIFIED",
            AttendanceState::Flagged => "FLAGGED",
            AttendanceState::Revoked => "REVOKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AttendanceState::Pending),
            "PRESENT" => Some(AttendanceState::Present),
            "ABSENT" => Some(AttendanceState::Absent),
            "VERIFIED" => Some(AttendanceState::Verified),
            "FLAGGED" => Some(AttendanceState::Flagged),
            "REVOKED" => Some(AttendanceState::Revoked),
            _ => None,
        }
    }
}

/// 转换尝试结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Accepted,
    Rejected,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Accepted => "ACCEPTED",
            AttemptOutcome::Rejected => "REJECTED",
        }
    }
}

/// 考勤记录
/// current_state 始终等于最近一次被接受的转换尝试的 to_state
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub current_state: String,
    pub last_attempt_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 转换尝试（无论接受或拒绝，每次尝试恰好一行，插入后不可变）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransitionAttempt {
    pub id: Uuid,
    pub record_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub reason_code: String,
    pub justification: Option<String>,
    pub outcome: String,
    pub rejection_reason: Option<String>,
    pub duplicate_of: Option<Uuid>,
    pub actor_id: Uuid,
    pub actor_role: String,
    pub idempotency_key: String,
    pub client_context: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
    pub checksum: String,
}

/// 创建考勤记录请求
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRecordRequest {
    pub subject_id: Uuid,
    pub session_id: Uuid,
    pub tenant_id: Uuid,
}

/// 转换尝试请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransitionRequest {
    pub target_state: AttendanceState,
    #[validate(length(min = 1, max = 64))]
    pub reason_code: String,
    #[validate(length(max = 2048))]
    pub justification: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    pub client_context: Option<serde_json::Value>,
}

/// 转换尝试响应
/// 拒绝不是裸错误：带机器可读原因和仍然可达的目标状态
#[derive(Debug, Clone, Serialize)]
pub struct TransitionResponse {
    pub attempt_id: Uuid,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<AttendanceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_targets: Option<Vec<AttendanceState>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
}

/// 机器可读的拒绝原因码
pub mod rejection {
    pub const TARGET_NOT_REACHABLE: &str = "TARGET_NOT_REACHABLE";
    pub const REASON_CODE_UNKNOWN: &str = "REASON_CODE_UNKNOWN";
    pub const REASON_NOT_PERMITTED_FOR_TARGET: &str = "REASON_NOT_PERMITTED_FOR_TARGET";
    pub const JUSTIFICATION_REQUIRED: &str = "JUSTIFICATION_REQUIRED";
    pub const ACTOR_NOT_AUTHORIZED: &str = "ACTOR_NOT_AUTHORIZED";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            AttendanceState::Pending,
            AttendanceState::Present,
            AttendanceState::Absent,
            AttendanceState::Verified,
            AttendanceState::Flagged,
            AttendanceState::Revoked,
        ] {
            assert_eq!(AttendanceState::parse(state.as_str()), Some(state));
        }
        assert_eq!(AttendanceState::parse("UNKNOWN"), None);
    }

    #[test]
    fn test_state_serde_uses_screaming_case() {
        let json = serde_json::to_string(&AttendanceState::Verified).unwrap();
        assert_eq!(json, "\"VERIFIED\"");
    }
}
