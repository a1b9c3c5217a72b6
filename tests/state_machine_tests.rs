//! 状态机策略单元测试
//!
//! 覆盖四步校验顺序与默认矩阵的可达性

use attendance_core::identity::ActorContext;
use attendance_core::models::attendance::{rejection, AttendanceState};
use attendance_core::models::catalog::{CatalogDocument, DEFAULT_CATALOG};
use attendance_core::models::role::ActorRole;
use attendance_core::services::transition_service::check_transition_policy;
use uuid::Uuid;

fn actor(role: ActorRole) -> ActorContext {
    ActorContext {
        actor_id: Uuid::new_v4(),
        role,
        tenant_id: Some(Uuid::new_v4()),
        permissions: vec![],
    }
}

#[test]
fn test_duplicate_flagging_flow_accepted() {
    // VERIFIED 记录因一小时内重复打卡被标记：带理由即接受
    let a = actor(ActorRole::Instructor);
    let result = check_transition_policy(
        &DEFAULT_CATALOG,
        AttendanceState::Verified,
        AttendanceState::Flagged,
        "DUPLICATE_SAME_HOUR",
        Some("dup scan within 1h"),
        &a,
        Uuid::new_v4(),
    );
    assert!(result.is_ok());
}

#[test]
fn test_flagged_subject_cannot_clear_own_record() {
    // 被标记的主体自己请求转回 VERIFIED：按策略拒绝，不是裸错误
    let subject = actor(ActorRole::Student);
    let err = check_transition_policy(
        &DEFAULT_CATALOG,
        AttendanceState::Flagged,
        AttendanceState::Verified,
        "APPEAL_ACCEPTED",
        Some("I swear I was there"),
        &subject,
        subject.actor_id,
    )
    .unwrap_err();

    assert_eq!(err.code, rejection::ACTOR_NOT_AUTHORIZED);
}

#[test]
fn test_third_party_registrar_may_clear_flag() {
    let registrar = actor(ActorRole::Registrar);
    assert!(check_transition_policy(
        &DEFAULT_CATALOG,
        AttendanceState::Flagged,
        AttendanceState::Verified,
        "APPEAL_ACCEPTED",
        Some("appeal reviewed and accepted"),
        &registrar,
        Uuid::new_v4(),
    )
    .is_ok());
}

#[test]
fn test_every_matrix_edge_has_authorization_rule() {
    // 矩阵里出现的每个目标态都必须有授权规则，否则一律不可达
    for rule in &DEFAULT_CATALOG.transition_matrix {
        for target in &rule.to {
            assert!(
                DEFAULT_CATALOG.minimum_role_for(*target).is_some(),
                "target {} has no authorization rule",
                target.as_str()
            );
        }
    }
}

#[test]
fn test_every_matrix_edge_has_reason_code() {
    // 每条边至少存在一个允许它的原因码，否则这条边永远走不通
    for rule in &DEFAULT_CATALOG.transition_matrix {
        for target in &rule.to {
            let covered = DEFAULT_CATALOG
                .reason_codes
                .iter()
                .any(|rc| rc.valid_targets.contains(target));
            assert!(covered, "no reason code permits target {}", target.as_str());
        }
    }
}

#[test]
fn test_unreachable_targets_rejected_for_all_states() {
    let a = actor(ActorRole::SuperAdmin);
    let states = [
        AttendanceState::Pending,
        AttendanceState::Present,
        AttendanceState::Absent,
        AttendanceState::Verified,
        AttendanceState::Flagged,
        AttendanceState::Revoked,
    ];

    for from in states {
        let allowed = DEFAULT_CATALOG.allowed_targets(from);
        for target in states {
            if allowed.contains(&target) || target == from {
                continue;
            }
            let err = check_transition_policy(
                &DEFAULT_CATALOG,
                from,
                target,
                "MANUAL_CORRECTION",
                Some("correction"),
                &a,
                Uuid::new_v4(),
            )
            .unwrap_err();
            assert_eq!(err.code, rejection::TARGET_NOT_REACHABLE);
        }
    }
}

#[test]
fn test_revoked_to_verified_is_a_catalog_choice() {
    // 默认目录允许申诉边；把它从矩阵里拿掉后同一请求必须被拒
    let a = actor(ActorRole::Registrar);
    assert!(check_transition_policy(
        &DEFAULT_CATALOG,
        AttendanceState::Revoked,
        AttendanceState::Verified,
        "APPEAL_ACCEPTED",
        Some("appeal accepted"),
        &a,
        Uuid::new_v4(),
    )
    .is_ok());

    let mut stricter: CatalogDocument = DEFAULT_CATALOG.clone();
    stricter
        .transition_matrix
        .retain(|rule| rule.from != AttendanceState::Revoked);

    let err = check_transition_policy(
        &stricter,
        AttendanceState::Revoked,
        AttendanceState::Verified,
        "APPEAL_ACCEPTED",
        Some("appeal accepted"),
        &a,
        Uuid::new_v4(),
    )
    .unwrap_err();
    assert_eq!(err.code, rejection::TARGET_NOT_REACHABLE);
}
