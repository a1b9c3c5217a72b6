//! 时间权威服务
//!
//! 漂移分类是纯函数：相同输入和阈值永远得到相同档位与动作。
//! 每次分类都落一条漂移样本，CRITICAL 另行升级账本事件。
//! 档位→动作的裁定：WARNING 放行并打标，BLOCKED 与 CRITICAL 一律拒绝。

use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::checksum;
use crate::error::AppError;
use crate::identity::ActorContext;
use crate::models::audit::{AuditAction, AuditScope, NewAuditEntry};
use crate::models::catalog::DriftThresholds;
use crate::models::drift::*;
use crate::services::catalog_service::CatalogService;
use crate::services::ledger_service::LedgerService;

/// 档位判定：|drift| 落入哪个档
/// warning / blocked / critical 是各档下边界，acceptable 是档内静默容差
pub fn classify(drift_seconds: i64, thresholds: &DriftThresholds) -> DriftCategory {
    let magnitude = drift_seconds.abs();

    if magnitude >= thresholds.critical_secs {
        DriftCategory::Critical
    } else if magnitude >= thresholds.blocked_secs {
        DriftCategory::Blocked
    } else if magnitude >= thresholds.warning_secs {
        DriftCategory::Warning
    } else {
        DriftCategory::Acceptable
    }
}

/// 振荡判定：窗口内出现 min_flips 次以上的"大幅且换号"相邻漂移
/// 大幅 = |drift| >= large；历史按新到旧传入
pub fn detect_oscillation(history: &[i64], current: i64, large: i64, min_flips: i64) -> bool {
    let mut flips = 0i64;
    let mut prev = current;

    for &drift in history {
        if prev.abs() >= large && drift.abs() >= large && prev.signum() != drift.signum() {
            flips += 1;
            if flips >= min_flips {
                return true;
            }
        }
        prev = drift;
    }

    false
}

pub struct TimeAuthority {
    db: PgPool,
    ledger: Arc<LedgerService>,
    catalog: Arc<CatalogService>,
    oscillation_window_secs: i64,
    oscillation_min_flips: i64,
}

impl TimeAuthority {
    pub fn new(
        db: PgPool,
        ledger: Arc<LedgerService>,
        catalog: Arc<CatalogService>,
        oscillation_window_secs: i64,
        oscillation_min_flips: i64,
    ) -> Self {
        Self {
            db,
            ledger,
            catalog,
            oscillation_window_secs,
            oscillation_min_flips,
        }
    }

    /// 分类一次客户端时间与可信服务器时钟的偏差
    #[instrument(skip(self, actor, request))]
    pub async fn classify_drift(
        &self,
        actor: &ActorContext,
        request: ClassifyDriftRequest,
    ) -> Result<DriftVerdict, AppError> {
        use validator::Validate;
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let server_time = Utc::now().trunc_subsecs(6);
        let client_time = request.client_time.trunc_subsecs(6);

        let doc = self.catalog.current().await;
        let thresholds = doc
            .drift_thresholds_for(request.device_class)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "no drift thresholds configured for device class {}",
                    request.device_class.as_str()
                ))
            })?;

        let drift_seconds = (server_time - client_time).num_seconds();
        let category = classify(drift_seconds, thresholds);
        let action = category.action();

        let mut flags: Vec<String> = Vec::new();

        if category == DriftCategory::Acceptable
            && drift_seconds.abs() > thresholds.acceptable_secs
        {
            flags.push(forensic::JITTER_ABOVE_ACCEPTABLE.to_string());
        }

        // 取证启发式只打标，不改变档位裁定
        let repo = crate::repository::drift_repo::DriftRepository::new(self.db.clone());
        let since = server_time - Duration::seconds(self.oscillation_window_secs);
        let history: Vec<i64> = repo
            .recent_samples(&request.device_id, since)
            .await?
            .iter()
            .map(|s| s.drift_seconds)
            .collect();

        if detect_oscillation(
            &history,
            drift_seconds,
            thresholds.warning_secs,
            self.oscillation_min_flips,
        ) {
            flags.push(forensic::OSCILLATING_DRIFT.to_string());
            warn!(
                device_id = %request.device_id,
                drift_seconds,
                "Oscillating drift pattern flagged"
            );
        }

        let sample = DriftSample {
            id: Uuid::new_v4(),
            subject_id: request.subject_id,
            device_id: request.device_id.clone(),
            device_class: request.device_class.as_str().to_string(),
            client_time,
            server_time,
            drift_seconds,
            category: category.as_str().to_string(),
            action_taken: action.as_str().to_string(),
            forensic_flags: serde_json::json!(&flags),
            occurred_at: server_time,
            checksum: checksum::drift_sample_checksum(
                &request.device_id,
                request.device_class.as_str(),
                &client_time,
                &server_time,
                drift_seconds,
                category.as_str(),
                action.as_str(),
            ),
        };

        repo.insert_sample(&sample).await?;

        // 每次分类都写入账本；CRITICAL 另行升级事件
        let ledger_action = if category == DriftCategory::Critical {
            AuditAction::DriftIncident
        } else {
            AuditAction::DriftClassify
        };

        self.ledger
            .append(NewAuditEntry {
                actor_id: actor.actor_id,
                actor_role: actor.role.as_str().to_string(),
                action: ledger_action,
                scope: AuditScope::User,
                scope_id: request.subject_id.or(Some(actor.actor_id)),
                resource_type: "drift_sample".to_string(),
                resource_id: Some(sample.id),
                before_state: None,
                after_state: Some(serde_json::json!({
                    "device_id": request.device_id,
                    "device_class": request.device_class.as_str(),
                    "drift_seconds": drift_seconds,
                    "category": category.as_str(),
                    "action": action.as_str(),
                    "forensic_flags": &flags,
                })),
                justification: None,
                trace_id: None,
                source_ip: None,
            })
            .await?;

        metrics::counter!("time.drift.classified", "category" => category.as_str()).increment(1);

        Ok(DriftVerdict {
            sample_id: sample.id,
            category,
            action,
            drift_seconds,
            forensic_flags: flags,
        })
    }
}

/// 秒级漂移（测试与外部调用方复用同一定义：server − client）
pub fn drift_between(client_time: DateTime<Utc>, server_time: DateTime<Utc>) -> i64 {
    (server_time - client_time).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drift::DeviceClass;

    fn thresholds() -> DriftThresholds {
        DriftThresholds {
            device_class: DeviceClass::MobileAndroid,
            acceptable_secs: 7,
            warning_secs: 300,
            blocked_secs: 600,
            critical_secs: 3600,
        }
    }

    #[test]
    fn test_classify_bands() {
        let t = thresholds();
        assert_eq!(classify(0, &t), DriftCategory::Acceptable);
        assert_eq!(classify(299, &t), DriftCategory::Acceptable);
        assert_eq!(classify(300, &t), DriftCategory::Warning);
        assert_eq!(classify(599, &t), DriftCategory::Warning);
        assert_eq!(classify(600, &t), DriftCategory::Blocked);
        assert_eq!(classify(650, &t), DriftCategory::Blocked);
        assert_eq!(classify(3599, &t), DriftCategory::Blocked);
        assert_eq!(classify(3600, &t), DriftCategory::Critical);
        assert_eq!(classify(86400, &t), DriftCategory::Critical);
    }

    #[test]
    fn test_classify_is_symmetric_in_sign() {
        let t = thresholds();
        assert_eq!(classify(-650, &t), classify(650, &t));
        assert_eq!(classify(-3600, &t), classify(3600, &t));
    }

    #[test]
    fn test_classify_is_pure() {
        let t = thresholds();
        for _ in 0..10 {
            assert_eq!(classify(650, &t), DriftCategory::Blocked);
            assert_eq!(classify(650, &t).action(), DriftAction::Reject);
        }
    }

    #[test]
    fn test_scenario_blocked_band() {
        // 650 秒漂移落入 BLOCKED 档，动作为拒绝
        let t = thresholds();
        let drift = drift_between(
            Utc::now(),
            Utc::now() + Duration::seconds(650),
        );
        let category = classify(drift, &t);
        assert_eq!(category, DriftCategory::Blocked);
        assert_eq!(category.action(), DriftAction::Reject);
    }

    #[test]
    fn test_oscillation_detection() {
        // 大幅正负交替：翻转两次即告警
        assert!(detect_oscillation(&[-400, 400, -400], 400, 300, 2));
        // 同号大幅漂移不算振荡
        assert!(!detect_oscillation(&[400, 450, 500], 400, 300, 2));
        // 幅度不足不算
        assert!(!detect_oscillation(&[-100, 100, -100], 100, 300, 2));
        // 翻转次数不足
        assert!(!detect_oscillation(&[-400], 400, 300, 2));
        // 历史为空
        assert!(!detect_oscillation(&[], 400, 300, 2));
    }
}
