//! 存储层集成测试（需要 TEST_DATABASE_URL 指向可用 Postgres）
//!
//! 重点验证追加写约束在存储层本身生效：
//! 即使绕过服务直接发 SQL，历史行也无法被改写或删除

use attendance_core::models::audit::{AuditAction, AuditScope, NewAuditEntry};
use attendance_core::services::LedgerService;
use uuid::Uuid;

mod common;
use common::{create_test_config, setup_test_db};

fn sample_entry() -> NewAuditEntry {
    NewAuditEntry {
        actor_id: Uuid::new_v4(),
        actor_role: "OPERATOR".to_string(),
        action: AuditAction::LedgerAppend,
        scope: AuditScope::Global,
        scope_id: None,
        resource_type: "attendance_record".to_string(),
        resource_id: Some(Uuid::new_v4()),
        before_state: None,
        after_state: Some(serde_json::json!({"state": "PRESENT"})),
        justification: None,
        trace_id: None,
        source_ip: None,
    }
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_audit_entries_reject_update_at_storage_layer() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    let ledger = LedgerService::new(pool.clone());
    let entry_id = ledger.append(sample_entry()).await.unwrap();

    // 服务层没有变更方法；直接 SQL 也必须被触发器拒绝
    let update = sqlx::query("UPDATE audit_entries SET action = 'tampered' WHERE id = $1")
        .bind(entry_id)
        .execute(&pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM audit_entries WHERE id = $1")
        .bind(entry_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    // 条目原样仍在
    let entry = ledger.find_entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.action, "ledger.append");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_transition_attempts_are_append_only() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    // 造一条记录和一次尝试
    sqlx::query(
        "INSERT INTO attendance_records (id, subject_id, session_id, tenant_id, current_state, created_at, updated_at)
         VALUES ($1, $2, $3, $4, 'PENDING', NOW(), NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    let record_id: Uuid = sqlx::query_scalar("SELECT id FROM attendance_records LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();

    let attempt_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO transition_attempts (id, record_id, from_state, to_state, reason_code,
         outcome, actor_id, actor_role, idempotency_key, occurred_at, checksum)
         VALUES ($1, $2, 'PENDING', 'PRESENT', 'SCAN_ACCEPTED', 'ACCEPTED', $3, 'INSTRUCTOR',
                 'key-1', NOW(), 'cafe')",
    )
    .bind(attempt_id)
    .bind(record_id)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    let update = sqlx::query("UPDATE transition_attempts SET outcome = 'REJECTED' WHERE id = $1")
        .bind(attempt_id)
        .execute(&pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM transition_attempts WHERE id = $1")
        .bind(attempt_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_attendance_record_update_limited_to_state_fields() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    let record_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO attendance_records (id, subject_id, session_id, tenant_id, current_state, created_at, updated_at)
         VALUES ($1, $2, $3, $4, 'PENDING', NOW(), NOW())",
    )
    .bind(record_id)
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    // 状态推进允许
    let ok = sqlx::query(
        "UPDATE attendance_records SET current_state = 'PRESENT', updated_at = NOW() WHERE id = $1",
    )
    .bind(record_id)
    .execute(&pool)
    .await;
    assert!(ok.is_ok());

    // 改主体引用被拒
    let rewrite = sqlx::query("UPDATE attendance_records SET subject_id = $1 WHERE id = $2")
        .bind(Uuid::new_v4())
        .bind(record_id)
        .execute(&pool)
        .await;
    assert!(rewrite.is_err());

    // 删除被拒：记录永不删除
    let delete = sqlx::query("DELETE FROM attendance_records WHERE id = $1")
        .bind(record_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_tampered_entry_detected_and_frozen() {
    let config = create_test_config();
    let pool = setup_test_db(&config).await;

    let ledger = LedgerService::new(pool.clone());
    let entry_id = ledger.append(sample_entry()).await.unwrap();

    // 模拟带外篡改：先绕过触发器（等价于直接改存储字节）
    sqlx::query("ALTER TABLE audit_entries DISABLE TRIGGER audit_entries_append_only")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE audit_entries SET after_state = '{\"state\":\"ABSENT\"}' WHERE id = $1")
        .bind(entry_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("ALTER TABLE audit_entries ENABLE TRIGGER audit_entries_append_only")
        .execute(&pool)
        .await
        .unwrap();

    // 校验发现不匹配，立完整性事件，条目本身不动
    let outcome = ledger.verify(entry_id, "test").await.unwrap();
    assert_eq!(outcome, attendance_core::models::audit::VerifyOutcome::Mismatch);

    let incidents: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM integrity_incidents WHERE entry_id = $1")
            .bind(entry_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(incidents, 1);

    // 重复校验不重复立事件
    ledger.verify(entry_id, "test").await.unwrap();
    let again: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM integrity_incidents WHERE entry_id = $1")
            .bind(entry_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(again, 1);

    // 条目仍然存在，从未被修复或删除
    assert!(ledger.find_entry(entry_id).await.unwrap().is_some());
}
