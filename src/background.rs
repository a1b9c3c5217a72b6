//! 后台校验任务
//!
//! 与请求路径解耦的独立循环：
//! 1. 抽样复验账本条目的校验和，发现篡改即立完整性事件
//! 2. 按优先级扫描逾期未处置的复核项，追加逾期审计标记
//!
//! 只读加追加，从不改写既有行；任何一轮出错只记日志，循环继续。

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::middleware::AppState;
use crate::models::audit::{AuditAction, AuditScope, NewAuditEntry, VerifyOutcome};
use crate::models::catalog::EscalationRules;
use crate::models::escalation::{QueuePriority, RevalidationQueueItem};
use crate::models::role::ActorRole;
use crate::repository::escalation_repo::EscalationRepository;

/// 优先级对应的逾期时限
fn overdue_deadline_secs(priority: QueuePriority, rules: &EscalationRules) -> i64 {
    match priority {
        QueuePriority::Critical => rules.overdue_critical_secs,
        QueuePriority::High => rules.overdue_high_secs,
        QueuePriority::Normal => rules.overdue_normal_secs,
        QueuePriority::Low => rules.overdue_low_secs,
    }
}

/// 待处置项是否已逾期
pub fn is_overdue(item: &RevalidationQueueItem, rules: &EscalationRules, now: chrono::DateTime<Utc>) -> bool {
    let Some(priority) = QueuePriority::parse(&item.priority) else {
        return false;
    };
    let deadline = item.enqueued_at + ChronoDuration::seconds(overdue_deadline_secs(priority, rules));
    now >= deadline
}

/// 启动后台循环
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: Arc<AppState>) {
    let base_interval = state.config.runtime.verifier_interval_secs;
    let sample_size = state.config.runtime.verifier_sample_size;

    // 逾期标记每个进程只追加一次，避免每轮刷屏
    let mut flagged: HashSet<Uuid> = HashSet::new();

    info!(
        interval_secs = base_interval,
        sample_size, "Background verifier started"
    );

    loop {
        // 抖动打散多实例的同步扫描
        let jitter = rand::thread_rng().gen_range(0..=base_interval / 4 + 1);
        tokio::time::sleep(Duration::from_secs(base_interval + jitter)).await;

        if let Err(e) = verify_sample(&state, sample_size).await {
            error!(error = %e, "Ledger sample verification pass failed");
        }

        if let Err(e) = escalate_overdue(&state, &mut flagged).await {
            error!(error = %e, "Overdue revalidation scan failed");
        }
    }
}

/// 抽样复验账本校验和
async fn verify_sample(state: &Arc<AppState>, sample_size: i64) -> Result<(), crate::error::AppError> {
    let entries = state.ledger_service.sample_entries(sample_size).await?;
    let mut mismatches = 0u64;

    for entry in &entries {
        match state
            .ledger_service
            .verify_entry(entry, "background_verifier")
            .await?
        {
            VerifyOutcome::Valid => {}
            VerifyOutcome::Mismatch => mismatches += 1,
        }
    }

    metrics::counter!("verifier.entries_checked").increment(entries.len() as u64);
    if mismatches > 0 {
        metrics::counter!("verifier.mismatches").increment(mismatches);
        error!(mismatches, checked = entries.len(), "Ledger sample found tampered entries");
    } else {
        info!(checked = entries.len(), "Ledger sample verified clean");
    }

    Ok(())
}

/// 按优先级追加逾期标记
async fn escalate_overdue(
    state: &Arc<AppState>,
    flagged: &mut HashSet<Uuid>,
) -> Result<(), crate::error::AppError> {
    let rules = state.catalog_service.current().await.escalation_rules.clone();
    let repo = EscalationRepository::new(state.db.clone());
    let now = Utc::now();

    // pending 列表本身已按 CRITICAL > HIGH > NORMAL > LOW 排序
    let pending = repo.pending_queue_items().await?;

    for item in pending {
        if flagged.contains(&item.id) || !is_overdue(&item, &rules, now) {
            continue;
        }

        warn!(
            item_id = %item.id,
            user_id = %item.user_id,
            priority = %item.priority,
            enqueued_at = %item.enqueued_at,
            "Revalidation item overdue"
        );

        state
            .ledger_service
            .append(NewAuditEntry {
                actor_id: Uuid::nil(),
                actor_role: ActorRole::SuperAdmin.as_str().to_string(),
                action: AuditAction::RevalidationOverdue,
                scope: AuditScope::User,
                scope_id: Some(item.user_id),
                resource_type: "revalidation_queue_item".to_string(),
                resource_id: Some(item.id),
                before_state: None,
                after_state: Some(serde_json::json!({
                    "priority": &item.priority,
                    "enqueued_at": item.enqueued_at,
                })),
                justification: None,
                trace_id: None,
                source_ip: None,
            })
            .await?;

        metrics::counter!("revalidation.overdue", "priority" => item.priority.clone())
            .increment(1);
        flagged.insert(item.id);
    }

    Ok(())
}
