//! 提权检测单元测试
//!
//! 严重度是信号结构上的单一纯函数，这里不触库直接驱动

use attendance_core::models::catalog::DEFAULT_CATALOG;
use attendance_core::models::escalation::{EscalationCheck, EscalationSignals, Severity};
use attendance_core::models::role::ActorRole;
use attendance_core::services::escalation_service::{
    build_signals, evaluate_signals, requires_revalidation,
};

fn perms(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}.{}", prefix, i)).collect()
}

#[test]
fn test_student_to_superadmin_is_critical_and_withheld() {
    // STUDENT -> SUPERADMIN 直跳最高权限角色
    let rules = &DEFAULT_CATALOG.escalation_rules;
    let signals = build_signals(
        ActorRole::Student,
        ActorRole::SuperAdmin,
        &perms("student", 2),
        &perms("admin", 4),
        0,
        rules,
    );

    let (severity, triggered) = evaluate_signals(&signals, rules);
    assert_eq!(severity, Severity::Critical);
    assert!(triggered.contains(&EscalationCheck::HighestPrivilegeTarget));
    assert!(requires_revalidation(severity));
}

#[test]
fn test_benign_promotion_scores_none() {
    let rules = &DEFAULT_CATALOG.escalation_rules;
    let signals = build_signals(
        ActorRole::Instructor,
        ActorRole::Registrar,
        &perms("teach", 3),
        &perms("teach", 4),
        0,
        rules,
    );

    let (severity, triggered) = evaluate_signals(&signals, rules);
    assert_eq!(severity, Severity::None);
    assert!(triggered.is_empty());
    assert!(!requires_revalidation(severity));
}

#[test]
fn test_severity_takes_maximum_of_checks() {
    let rules = &DEFAULT_CATALOG.escalation_rules;

    // 同时命中 Medium（权限差）和 High（速率）：结果是 High
    let signals = EscalationSignals {
        permission_delta: rules.permission_delta_threshold + 1,
        granted_permissions: 0,
        targets_highest_role: false,
        recent_changes: rules.rate_threshold,
        pair_denied: false,
    };

    let (severity, triggered) = evaluate_signals(&signals, rules);
    assert_eq!(severity, Severity::High);
    assert_eq!(triggered.len(), 2);
}

#[test]
fn test_monotonic_widening_delta_never_lowers_severity() {
    let rules = &DEFAULT_CATALOG.escalation_rules;
    let mut previous = Severity::None;

    for delta in 0..=(rules.permission_delta_threshold * 2) {
        let signals = EscalationSignals {
            permission_delta: delta,
            granted_permissions: 0,
            targets_highest_role: false,
            recent_changes: 0,
            pair_denied: false,
        };
        let (severity, _) = evaluate_signals(&signals, rules);
        assert!(severity >= previous, "severity dropped at delta {}", delta);
        previous = severity;
    }
}

#[test]
fn test_monotonic_adding_rule_violation_never_lowers_severity() {
    let rules = &DEFAULT_CATALOG.escalation_rules;

    let cases = [
        EscalationSignals::default(),
        EscalationSignals {
            permission_delta: rules.permission_delta_threshold,
            ..Default::default()
        },
        EscalationSignals {
            recent_changes: rules.rate_threshold,
            ..Default::default()
        },
    ];

    for base in cases {
        let (base_severity, base_triggered) = evaluate_signals(&base, rules);

        let mut with_denied = base;
        with_denied.pair_denied = true;
        let (denied_severity, denied_triggered) = evaluate_signals(&with_denied, rules);

        assert!(denied_severity >= base_severity);
        assert!(denied_triggered.len() > base_triggered.len());
    }
}

#[test]
fn test_five_checks_are_independent() {
    let rules = &DEFAULT_CATALOG.escalation_rules;

    let single_hits = [
        (
            EscalationSignals {
                permission_delta: rules.permission_delta_threshold,
                ..Default::default()
            },
            EscalationCheck::PermissionDeltaExceeded,
        ),
        (
            EscalationSignals {
                targets_highest_role: true,
                ..Default::default()
            },
            EscalationCheck::HighestPrivilegeTarget,
        ),
        (
            EscalationSignals {
                recent_changes: rules.rate_threshold,
                ..Default::default()
            },
            EscalationCheck::ChangeRateExceeded,
        ),
        (
            EscalationSignals {
                pair_denied: true,
                ..Default::default()
            },
            EscalationCheck::RolePairDenied,
        ),
        (
            EscalationSignals {
                granted_permissions: rules.granted_permission_threshold,
                ..Default::default()
            },
            EscalationCheck::GrantedPermissionsExceeded,
        ),
    ];

    for (signals, expected) in single_hits {
        let (_, triggered) = evaluate_signals(&signals, rules);
        assert_eq!(triggered, vec![expected]);
    }
}

#[test]
fn test_permission_sets_deduplicated_before_counting() {
    let rules = &DEFAULT_CATALOG.escalation_rules;
    let from = vec!["p.read".to_string(), "p.read".to_string()];
    let to = vec!["p.read".to_string(), "p.write".to_string(), "p.write".to_string()];

    let signals = build_signals(
        ActorRole::Instructor,
        ActorRole::Registrar,
        &from,
        &to,
        0,
        rules,
    );
    assert_eq!(signals.permission_delta, 1);
    assert_eq!(signals.granted_permissions, 1);
}

#[test]
fn test_revalidation_threshold_is_high() {
    assert!(!requires_revalidation(Severity::None));
    assert!(!requires_revalidation(Severity::Low));
    assert!(!requires_revalidation(Severity::Medium));
    assert!(requires_revalidation(Severity::High));
    assert!(requires_revalidation(Severity::Critical));
}
