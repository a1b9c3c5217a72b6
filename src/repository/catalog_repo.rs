//! Catalog repository (配置目录数据访问)
//!
//! 版本行追加写，最高版本即生效版本

use crate::{error::AppError, models::catalog::CatalogVersion};
use sqlx::{PgPool, Postgres, Transaction};

pub struct CatalogRepository {
    db: PgPool,
}

impl CatalogRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn latest_version(&self) -> Result<Option<CatalogVersion>, AppError> {
        let version = sqlx::query_as::<_, CatalogVersion>(
            "SELECT * FROM config_catalog ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(version)
    }

    pub async fn find_version(&self, version: i64) -> Result<Option<CatalogVersion>, AppError> {
        let row = sqlx::query_as::<_, CatalogVersion>(
            "SELECT * FROM config_catalog WHERE version = $1",
        )
        .bind(version)
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    pub async fn insert_version_tx(
        tx: &mut Transaction<'_, Postgres>,
        row: &CatalogVersion,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO config_catalog (
                version, document, published_by, justification, published_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.version)
        .bind(&row.document)
        .bind(row.published_by)
        .bind(&row.justification)
        .bind(row.published_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
