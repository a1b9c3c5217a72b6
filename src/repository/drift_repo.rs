//! Drift repository (漂移样本数据访问)

use crate::{error::AppError, models::drift::DriftSample};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct DriftRepository {
    db: PgPool,
}

impl DriftRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 插入漂移样本
    pub async fn insert_sample(&self, sample: &DriftSample) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO drift_samples (
                id, subject_id, device_id, device_class, client_time, server_time,
                drift_seconds, category, action_taken, forensic_flags, occurred_at, checksum
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(sample.id)
        .bind(sample.subject_id)
        .bind(&sample.device_id)
        .bind(&sample.device_class)
        .bind(sample.client_time)
        .bind(sample.server_time)
        .bind(sample.drift_seconds)
        .bind(&sample.category)
        .bind(&sample.action_taken)
        .bind(&sample.forensic_flags)
        .bind(sample.occurred_at)
        .bind(&sample.checksum)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 同一设备在回看窗口内的样本（振荡启发式用，新到旧）
    pub async fn recent_samples(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DriftSample>, AppError> {
        let samples = sqlx::query_as::<_, DriftSample>(
            r#"
            SELECT * FROM drift_samples
            WHERE device_id = $1 AND occurred_at >= $2
            ORDER BY occurred_at DESC
            LIMIT 64
            "#,
        )
        .bind(device_id)
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        Ok(samples)
    }
}
