//! 完整性校验和
//!
//! 对条目的不可变字段在写入时计算 SHA-256，校验时重算比对。
//! 两个稳定性约束决定了这里的规范化方式：
//! - jsonb 落库后不保留键序，哈希前必须按键排序输出
//! - timestamptz 精度是微秒，时间戳必须先截断再参与哈希

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 递归按键排序的紧凑 JSON 形式
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

/// 微秒精度的规范时间形式
pub fn canonical_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_uuid(v: &Option<Uuid>) -> String {
    v.map(|u| u.to_string()).unwrap_or_default()
}

fn opt_str(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}

fn opt_json(v: &Option<serde_json::Value>) -> String {
    v.as_ref().map(canonical_json).unwrap_or_default()
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// 审计条目校验和：覆盖全部不可变字段
#[allow(clippy::too_many_arguments)]
pub fn audit_entry_checksum(
    actor_id: Uuid,
    actor_role: &str,
    action: &str,
    scope_type: &str,
    scope_id: &Option<Uuid>,
    resource_type: &str,
    resource_id: &Option<Uuid>,
    before_state: &Option<serde_json::Value>,
    after_state: &Option<serde_json::Value>,
    occurred_at: &DateTime<Utc>,
) -> String {
    digest(&[
        "audit.v1",
        &actor_id.to_string(),
        actor_role,
        action,
        scope_type,
        &opt_uuid(scope_id),
        resource_type,
        &opt_uuid(resource_id),
        &opt_json(before_state),
        &opt_json(after_state),
        &canonical_time(occurred_at),
    ])
}

/// 转换尝试校验和
#[allow(clippy::too_many_arguments)]
pub fn transition_attempt_checksum(
    record_id: Uuid,
    from_state: &str,
    to_state: &str,
    reason_code: &str,
    outcome: &str,
    rejection_reason: &Option<String>,
    actor_id: Uuid,
    idempotency_key: &str,
    occurred_at: &DateTime<Utc>,
) -> String {
    digest(&[
        "attempt.v1",
        &record_id.to_string(),
        from_state,
        to_state,
        reason_code,
        outcome,
        opt_str(rejection_reason),
        &actor_id.to_string(),
        idempotency_key,
        &canonical_time(occurred_at),
    ])
}

/// 漂移样本校验和
pub fn drift_sample_checksum(
    device_id: &str,
    device_class: &str,
    client_time: &DateTime<Utc>,
    server_time: &DateTime<Utc>,
    drift_seconds: i64,
    category: &str,
    action_taken: &str,
) -> String {
    digest(&[
        "drift.v1",
        device_id,
        device_class,
        &canonical_time(client_time),
        &canonical_time(server_time),
        &drift_seconds.to_string(),
        category,
        action_taken,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_arrays_keep_order() {
        let a = json!([3, 1, 2]);
        assert_eq!(canonical_json(&a), "[3,1,2]");
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let actor = Uuid::new_v4();
        let ts = Utc::now();
        let before = Some(json!({"state": "VERIFIED"}));
        let after = Some(json!({"state": "FLAGGED"}));

        let a = audit_entry_checksum(
            actor,
            "OPERATOR",
            "attendance.transition.accept",
            "TENANT",
            &None,
            "attendance_record",
            &None,
            &before,
            &after,
            &ts,
        );
        let b = audit_entry_checksum(
            actor,
            "OPERATOR",
            "attendance.transition.accept",
            "TENANT",
            &None,
            "attendance_record",
            &None,
            &before,
            &after,
            &ts,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_changes_with_any_field() {
        let actor = Uuid::new_v4();
        let ts = Utc::now();

        let base = audit_entry_checksum(
            actor, "OPERATOR", "ledger.append", "GLOBAL", &None, "audit_entry", &None, &None,
            &None, &ts,
        );
        let other_action = audit_entry_checksum(
            actor, "OPERATOR", "ledger.query", "GLOBAL", &None, "audit_entry", &None, &None,
            &None, &ts,
        );
        let other_role = audit_entry_checksum(
            actor, "SUPERADMIN", "ledger.append", "GLOBAL", &None, "audit_entry", &None, &None,
            &None, &ts,
        );
        assert_ne!(base, other_action);
        assert_ne!(base, other_role);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // 分隔符保证 ("ab","c") 与 ("a","bc") 哈希不同
        let ts = Utc::now();
        let a = drift_sample_checksum("ab", "c", &ts, &ts, 0, "ACCEPTABLE", "PROCEED");
        let b = drift_sample_checksum("a", "bc", &ts, &ts, 0, "ACCEPTABLE", "PROCEED");
        assert_ne!(a, b);
    }
}
