//! Escalation repository (角色变更与复核队列数据访问)

use crate::{error::AppError, models::escalation::*};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// 复核队列查询过滤条件
#[derive(Debug, Default)]
pub struct QueueFilters {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub user_id: Option<Uuid>,
}

pub struct EscalationRepository {
    db: PgPool,
}

impl EscalationRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ==================== Role Change Events ====================

    pub async fn insert_event_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: &RoleChangeEvent,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO role_change_events (
                id, user_id, previous_role, new_role, actor_id, actor_role,
                triggered_checks, severity, requires_revalidation,
                sessions_marked_invalid, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.previous_role)
        .bind(&event.new_role)
        .bind(event.actor_id)
        .bind(&event.actor_role)
        .bind(&event.triggered_checks)
        .bind(&event.severity)
        .bind(event.requires_revalidation)
        .bind(event.sessions_marked_invalid)
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn find_event(&self, id: Uuid) -> Result<Option<RoleChangeEvent>, AppError> {
        let event = sqlx::query_as::<_, RoleChangeEvent>(
            "SELECT * FROM role_change_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(event)
    }

    /// 滑动窗口内该用户的角色变更次数
    /// 速率检查要求一致读：直接数已持久化的事件行，不走任何缓存
    pub async fn count_recent_changes(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM role_change_events WHERE user_id = $1 AND occurred_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        let count: i64 = row.get(0);
        Ok(count)
    }

    // ==================== Revalidation Queue ====================

    pub async fn insert_queue_item_tx(
        tx: &mut Transaction<'_, Postgres>,
        item: &RevalidationQueueItem,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO revalidation_queue (
                id, user_id, event_id, priority, reason, status,
                enqueued_at, resolved_at, resolved_by, resolution_note
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(item.event_id)
        .bind(&item.priority)
        .bind(&item.reason)
        .bind(&item.status)
        .bind(item.enqueued_at)
        .bind(item.resolved_at)
        .bind(item.resolved_by)
        .bind(&item.resolution_note)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn find_queue_item(
        &self,
        id: Uuid,
    ) -> Result<Option<RevalidationQueueItem>, AppError> {
        let item = sqlx::query_as::<_, RevalidationQueueItem>(
            "SELECT * FROM revalidation_queue WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(item)
    }

    pub async fn find_queue_item_by_event(
        &self,
        event_id: Uuid,
    ) -> Result<Option<RevalidationQueueItem>, AppError> {
        let item = sqlx::query_as::<_, RevalidationQueueItem>(
            "SELECT * FROM revalidation_queue WHERE event_id = $1 ORDER BY enqueued_at DESC LIMIT 1",
        )
        .bind(event_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(item)
    }

    /// 查询复核队列，按优先级降序再按入队时间升序
    pub async fn list_queue_items(
        &self,
        filters: &QueueFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RevalidationQueueItem>, AppError> {
        let mut query = String::from("SELECT * FROM revalidation_queue WHERE 1=1");
        let mut index = 0;

        if filters.status.is_some() {
            index += 1;
            query.push_str(&format!(" AND status = ${}", index));
        }
        if filters.priority.is_some() {
            index += 1;
            query.push_str(&format!(" AND priority = ${}", index));
        }
        if filters.user_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND user_id = ${}", index));
        }

        query.push_str(&format!(
            " ORDER BY CASE priority \
               WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1 \
               WHEN 'NORMAL' THEN 2 ELSE 3 END, \
              enqueued_at ASC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        ));

        let mut query_builder = sqlx::query_as::<_, RevalidationQueueItem>(&query);

        if let Some(status) = &filters.status {
            query_builder = query_builder.bind(status);
        }
        if let Some(priority) = &filters.priority {
            query_builder = query_builder.bind(priority);
        }
        if let Some(user_id) = filters.user_id {
            query_builder = query_builder.bind(user_id);
        }
        query_builder = query_builder.bind(limit).bind(offset);

        let items = query_builder.fetch_all(&self.db).await?;
        Ok(items)
    }

    /// 待处理项（后台逾期扫描用）
    pub async fn pending_queue_items(&self) -> Result<Vec<RevalidationQueueItem>, AppError> {
        let items = sqlx::query_as::<_, RevalidationQueueItem>(
            r#"
            SELECT * FROM revalidation_queue
            WHERE status = 'PENDING'
            ORDER BY CASE priority
               WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1
               WHEN 'NORMAL' THEN 2 ELSE 3 END,
              enqueued_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(items)
    }

    /// 处置复核项，只改处置字段，且要求当前仍是 PENDING
    /// 返回受影响行数；0 表示已被并发处置
    pub async fn resolve_queue_item_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: &str,
        resolved_by: Uuid,
        note: &Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE revalidation_queue
            SET status = $1, resolved_at = $2, resolved_by = $3, resolution_note = $4
            WHERE id = $5 AND status = 'PENDING'
            "#,
        )
        .bind(status)
        .bind(resolved_at)
        .bind(resolved_by)
        .bind(note)
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
