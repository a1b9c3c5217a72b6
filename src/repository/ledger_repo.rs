//! Ledger repository (审计账本数据访问)
//!
//! 只有插入与读取。UPDATE/DELETE 不仅没有方法，
//! 存储层触发器也会直接拒绝（见 migrations/0002_append_only.sql）。

use crate::{error::AppError, models::audit::*};
use futures::stream::BoxStream;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// 账本查询的结构性可见范围，由调用方身份推导，与过滤条件无关
#[derive(Debug, Clone, Copy)]
pub enum ScopeRestriction {
    /// 顶层运维角色：全部可见
    All,
    /// 租户管理员：本租户条目加自己的 USER 条目
    TenantAndOwn { tenant_id: Uuid, actor_id: Uuid },
    /// 其他调用方：只看得到自己是主体的 USER 条目
    OwnOnly { actor_id: Uuid },
}

pub struct LedgerRepository {
    db: PgPool,
}

impl LedgerRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ==================== Audit Entries ====================

    /// 插入审计条目
    pub async fn insert_entry(&self, entry: &AuditEntry) -> Result<(), AppError> {
        let mut conn = self.db.acquire().await?;
        Self::insert_entry_on(&mut conn, entry).await
    }

    /// 在既有事务内插入审计条目（与状态变更同一原子单元）
    pub async fn insert_entry_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry: &AuditEntry,
    ) -> Result<(), AppError> {
        Self::insert_entry_on(&mut **tx, entry).await
    }

    async fn insert_entry_on(
        conn: &mut sqlx::PgConnection,
        entry: &AuditEntry,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, actor_id, actor_role, action, scope_type, scope_id,
                resource_type, resource_id, before_state, after_state,
                justification, trace_id, source_ip, occurred_at, checksum
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.actor_role)
        .bind(&entry.action)
        .bind(&entry.scope_type)
        .bind(entry.scope_id)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(&entry.before_state)
        .bind(&entry.after_state)
        .bind(&entry.justification)
        .bind(&entry.trace_id)
        .bind(&entry.source_ip)
        .bind(entry.occurred_at)
        .bind(&entry.checksum)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_entry(&self, id: Uuid) -> Result<Option<AuditEntry>, AppError> {
        let entry = sqlx::query_as::<_, AuditEntry>("SELECT * FROM audit_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(entry)
    }

    /// 查询审计条目
    /// 可见范围是独立入参：没有它无法构造查询，结构上杜绝未授权读取
    pub async fn query_entries(
        &self,
        filters: &AuditEntryFilters,
        scope: ScopeRestriction,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let (mut query, index) = Self::build_where(filters, scope);

        query.push_str(&format!(
            " ORDER BY occurred_at DESC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        ));

        let mut query_builder = sqlx::query_as::<_, AuditEntry>(&query);
        query_builder = Self::bind_where(query_builder, filters, scope);
        query_builder = query_builder.bind(limit).bind(offset);

        let entries = query_builder.fetch_all(&self.db).await?;
        Ok(entries)
    }

    /// 统计满足条件的条目数
    pub async fn count_entries(
        &self,
        filters: &AuditEntryFilters,
        scope: ScopeRestriction,
    ) -> Result<i64, AppError> {
        let (query, _) = Self::build_where_with(filters, scope, "SELECT COUNT(*) FROM audit_entries");

        let mut query_builder = sqlx::query(&query);
        query_builder = Self::bind_where_plain(query_builder, filters, scope);

        let row = query_builder.fetch_one(&self.db).await?;
        let count: i64 = row.get(0);
        Ok(count)
    }

    fn build_where(
        filters: &AuditEntryFilters,
        scope: ScopeRestriction,
    ) -> (String, usize) {
        Self::build_where_with(filters, scope, "SELECT * FROM audit_entries")
    }

    fn build_where_with(
        filters: &AuditEntryFilters,
        scope: ScopeRestriction,
        prefix: &str,
    ) -> (String, usize) {
        let mut query = format!("{} WHERE 1=1", prefix);
        let mut index = 0;

        if filters.actor_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND actor_id = ${}", index));
        }
        if filters.action.is_some() {
            index += 1;
            query.push_str(&format!(" AND action = ${}", index));
        }
        if filters.resource_type.is_some() {
            index += 1;
            query.push_str(&format!(" AND resource_type = ${}", index));
        }
        if filters.resource_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND resource_id = ${}", index));
        }
        if filters.start_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at >= ${}", index));
        }
        if filters.end_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at <= ${}", index));
        }

        match scope {
            ScopeRestriction::All => {}
            ScopeRestriction::TenantAndOwn { .. } => {
                query.push_str(&format!(
                    " AND ((scope_type = 'TENANT' AND scope_id = ${}) OR (scope_type = 'USER' AND scope_id = ${}))",
                    index + 1,
                    index + 2
                ));
                index += 2;
            }
            ScopeRestriction::OwnOnly { .. } => {
                index += 1;
                query.push_str(&format!(
                    " AND scope_type = 'USER' AND scope_id = ${}",
                    index
                ));
            }
        }

        (query, index)
    }

    fn bind_where<'q>(
        mut qb: sqlx::query::QueryAs<'q, Postgres, AuditEntry, sqlx::postgres::PgArguments>,
        filters: &'q AuditEntryFilters,
        scope: ScopeRestriction,
    ) -> sqlx::query::QueryAs<'q, Postgres, AuditEntry, sqlx::postgres::PgArguments> {
        if let Some(actor_id) = filters.actor_id {
            qb = qb.bind(actor_id);
        }
        if let Some(action) = &filters.action {
            qb = qb.bind(action);
        }
        if let Some(resource_type) = &filters.resource_type {
            qb = qb.bind(resource_type);
        }
        if let Some(resource_id) = filters.resource_id {
            qb = qb.bind(resource_id);
        }
        if let Some(start_time) = filters.start_time {
            qb = qb.bind(start_time);
        }
        if let Some(end_time) = filters.end_time {
            qb = qb.bind(end_time);
        }
        match scope {
            ScopeRestriction::All => {}
            ScopeRestriction::TenantAndOwn { tenant_id, actor_id } => {
                qb = qb.bind(tenant_id).bind(actor_id);
            }
            ScopeRestriction::OwnOnly { actor_id } => {
                qb = qb.bind(actor_id);
            }
        }
        qb
    }

    fn bind_where_plain<'q>(
        mut qb: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        filters: &'q AuditEntryFilters,
        scope: ScopeRestriction,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        if let Some(actor_id) = filters.actor_id {
            qb = qb.bind(actor_id);
        }
        if let Some(action) = &filters.action {
            qb = qb.bind(action);
        }
        if let Some(resource_type) = &filters.resource_type {
            qb = qb.bind(resource_type);
        }
        if let Some(resource_id) = filters.resource_id {
            qb = qb.bind(resource_id);
        }
        if let Some(start_time) = filters.start_time {
            qb = qb.bind(start_time);
        }
        if let Some(end_time) = filters.end_time {
            qb = qb.bind(end_time);
        }
        match scope {
            ScopeRestriction::All => {}
            ScopeRestriction::TenantAndOwn { tenant_id, actor_id } => {
                qb = qb.bind(tenant_id).bind(actor_id);
            }
            ScopeRestriction::OwnOnly { actor_id } => {
                qb = qb.bind(actor_id);
            }
        }
        qb
    }

    /// 按主体可见范围流式读取（调用方逐条消费，不整页物化）
    pub fn stream_own_entries(
        &self,
        actor_id: Uuid,
    ) -> BoxStream<'_, Result<AuditEntry, sqlx::Error>> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_entries
            WHERE scope_type = 'USER' AND scope_id = $1
            ORDER BY occurred_at DESC
            "#,
        )
        .bind(actor_id)
        .fetch(&self.db)
    }

    /// 随机抽样（后台校验任务用）
    pub async fn sample_entries(&self, n: i64) -> Result<Vec<AuditEntry>, AppError> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            "SELECT * FROM audit_entries ORDER BY random() LIMIT $1",
        )
        .bind(n)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    // ==================== Integrity Incidents ====================

    /// 记录完整性事件（冻结标记：条目本身永不改写）
    pub async fn insert_incident(&self, incident: &IntegrityIncident) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO integrity_incidents (
                id, entry_id, stored_checksum, computed_checksum, detected_by, detected_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(incident.id)
        .bind(incident.entry_id)
        .bind(&incident.stored_checksum)
        .bind(&incident.computed_checksum)
        .bind(&incident.detected_by)
        .bind(incident.detected_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 条目是否已被冻结待查
    pub async fn has_incident(&self, entry_id: Uuid) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM integrity_incidents WHERE entry_id = $1",
        )
        .bind(entry_id)
        .fetch_one(&self.db)
        .await?;

        let count: i64 = row.get(0);
        Ok(count > 0)
    }
}
