//! Time authority domain models
//! 时钟漂移分类与取证样本

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 设备类别，各自拥有独立的漂移阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceClass {
    MobileAndroid,
    MobileIos,
    KioskTablet,
    WebBrowser,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::MobileAndroid => "MOBILE_ANDROID",
            DeviceClass::MobileIos => "MOBILE_IOS",
            DeviceClass::KioskTablet => "KIOSK_TABLET",
            DeviceClass::WebBrowser => "WEB_BROWSER",
        }
    }
}

/// 漂移档位，单调递增且互不重叠
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftCategory {
    Acceptable,
    Warning,
    Blocked,
    Critical,
}

impl DriftCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftCategory::Acceptable => "ACCEPTABLE",
            DriftCategory::Warning => "WARNING",
            DriftCategory::Blocked => "BLOCKED",
            DriftCategory::Critical => "CRITICAL",
        }
    }

    /// 每个档位固定映射到一个动作：
    /// ACCEPTABLE 静默放行，WARNING 放行并打标，
    /// BLOCKED 拒绝原始操作，CRITICAL 拒绝并升级事件
    pub fn action(&self) -> DriftAction {
        match self {
            DriftCategory::Acceptable => DriftAction::Proceed,
            DriftCategory::Warning => DriftAction::ProceedFlagged,
            DriftCategory::Blocked => DriftAction::Reject,
            DriftCategory::Critical => DriftAction::RejectIncident,
        }
    }
}

/// 分类结果对应的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftAction {
    Proceed,
    ProceedFlagged,
    Reject,
    RejectIncident,
}

impl DriftAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftAction::Proceed => "PROCEED",
            DriftAction::ProceedFlagged => "PROCEED_FLAGGED",
            DriftAction::Reject => "REJECT",
            DriftAction::RejectIncident => "REJECT_INCIDENT",
        }
    }
}

/// 漂移样本（插入后不可变）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DriftSample {
    pub id: Uuid,
    pub subject_id: Option<Uuid>,
    pub device_id: String,
    pub device_class: String,
    pub client_time: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
    pub drift_seconds: i64,
    pub category: String,
    pub action_taken: String,
    pub forensic_flags: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub checksum: String,
}

/// 漂移分类请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClassifyDriftRequest {
    pub subject_id: Option<Uuid>,
    #[validate(length(min = 1, max = 128))]
    pub device_id: String,
    pub device_class: DeviceClass,
    pub client_time: DateTime<Utc>,
}

/// 漂移分类响应
#[derive(Debug, Clone, Serialize)]
pub struct DriftVerdict {
    pub sample_id: Uuid,
    pub category: DriftCategory,
    pub action: DriftAction,
    pub drift_seconds: i64,
    pub forensic_flags: Vec<String>,
}

/// 取证标记
pub mod forensic {
    /// 同一设备短窗口内出现大幅正负交替漂移
    pub const OSCILLATING_DRIFT: &str = "OSCILLATING_DRIFT";
    /// 落在 ACCEPTABLE 档内但超出静默容差
    pub const JITTER_ABOVE_ACCEPTABLE: &str = "JITTER_ABOVE_ACCEPTABLE";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_action_mapping_is_fixed() {
        assert_eq!(DriftCategory::Acceptable.action(), DriftAction::Proceed);
        assert_eq!(DriftCategory::Warning.action(), DriftAction::ProceedFlagged);
        assert_eq!(DriftCategory::Blocked.action(), DriftAction::Reject);
        assert_eq!(DriftCategory::Critical.action(), DriftAction::RejectIncident);
    }

    #[test]
    fn test_device_class_serde() {
        let json = serde_json::to_string(&DeviceClass::MobileAndroid).unwrap();
        assert_eq!(json, "\"MOBILE_ANDROID\"");
        let parsed: DeviceClass = serde_json::from_str("\"KIOSK_TABLET\"").unwrap();
        assert_eq!(parsed, DeviceClass::KioskTablet);
    }

    #[test]
    fn test_category_ordering() {
        assert!(DriftCategory::Acceptable < DriftCategory::Warning);
        assert!(DriftCategory::Warning < DriftCategory::Blocked);
        assert!(DriftCategory::Blocked < DriftCategory::Critical);
    }
}
