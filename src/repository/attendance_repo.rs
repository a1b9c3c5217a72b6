//! Attendance repository (考勤数据访问)
//!
//! 记录行只允许状态推进（CAS），转换尝试表是追加写

use crate::{error::AppError, models::attendance::*};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct AttendanceRepository {
    db: PgPool,
}

impl AttendanceRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    // ==================== Records ====================

    pub async fn insert_record_tx(
        tx: &mut Transaction<'_, Postgres>,
        record: &AttendanceRecord,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO attendance_records (
                id, subject_id, session_id, tenant_id, current_state,
                last_attempt_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.subject_id)
        .bind(record.session_id)
        .bind(record.tenant_id)
        .bind(&record.current_state)
        .bind(record.last_attempt_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn find_record(&self, id: Uuid) -> Result<Option<AttendanceRecord>, AppError> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            "SELECT * FROM attendance_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// 状态推进，带 from_state 守卫
    /// 返回受影响行数；0 表示并发写入者抢先，调用方拒绝并让上游重试
    pub async fn advance_state_tx(
        tx: &mut Transaction<'_, Postgres>,
        record_id: Uuid,
        expected_from: &str,
        to_state: &str,
        attempt_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET current_state = $1, last_attempt_id = $2, updated_at = $3
            WHERE id = $4 AND current_state = $5
            "#,
        )
        .bind(to_state)
        .bind(attempt_id)
        .bind(updated_at)
        .bind(record_id)
        .bind(expected_from)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== Transition Attempts ====================

    pub async fn insert_attempt_tx(
        tx: &mut Transaction<'_, Postgres>,
        attempt: &TransitionAttempt,
    ) -> Result<(), AppError> {
        Self::insert_attempt_on(&mut **tx, attempt).await
    }

    pub async fn insert_attempt(&self, attempt: &TransitionAttempt) -> Result<(), AppError> {
        let mut conn = self.db.acquire().await?;
        Self::insert_attempt_on(&mut conn, attempt).await
    }

    async fn insert_attempt_on(
        conn: &mut sqlx::PgConnection,
        attempt: &TransitionAttempt,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO transition_attempts (
                id, record_id, from_state, to_state, reason_code, justification,
                outcome, rejection_reason, duplicate_of, actor_id, actor_role,
                idempotency_key, client_context, occurred_at, checksum
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.record_id)
        .bind(&attempt.from_state)
        .bind(&attempt.to_state)
        .bind(&attempt.reason_code)
        .bind(&attempt.justification)
        .bind(&attempt.outcome)
        .bind(&attempt.rejection_reason)
        .bind(attempt.duplicate_of)
        .bind(attempt.actor_id)
        .bind(&attempt.actor_role)
        .bind(&attempt.idempotency_key)
        .bind(&attempt.client_context)
        .bind(attempt.occurred_at)
        .bind(&attempt.checksum)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 同一逻辑事件（记录、幂等键、目标态）此前被接受的那次尝试
    pub async fn find_accepted_by_idempotency(
        &self,
        record_id: Uuid,
        idempotency_key: &str,
        to_state: &str,
    ) -> Result<Option<TransitionAttempt>, AppError> {
        let attempt = sqlx::query_as::<_, TransitionAttempt>(
            r#"
            SELECT * FROM transition_attempts
            WHERE record_id = $1 AND idempotency_key = $2 AND to_state = $3
              AND outcome = 'ACCEPTED' AND duplicate_of IS NULL
            ORDER BY occurred_at ASC
            LIMIT 1
            "#,
        )
        .bind(record_id)
        .bind(idempotency_key)
        .bind(to_state)
        .fetch_optional(&self.db)
        .await?;

        Ok(attempt)
    }

    pub async fn list_attempts(
        &self,
        record_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransitionAttempt>, AppError> {
        let attempts = sqlx::query_as::<_, TransitionAttempt>(
            r#"
            SELECT * FROM transition_attempts
            WHERE record_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(record_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(attempts)
    }
}
