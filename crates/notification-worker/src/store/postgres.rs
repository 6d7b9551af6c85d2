//! PostgreSQL 状态存储

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_shared::error::{NotifyError, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{debug, info, instrument};

use super::NotificationStatusStore;
use crate::models::{AggregateStatus, ChannelState, NotificationStatus};

const ENTITY: &str = "NotificationStatus";

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    notification_id: String,
    status: String,
    channel_statuses: Json<BTreeMap<String, ChannelState>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for NotificationStatus {
    type Error = NotifyError;

    fn try_from(row: StatusRow) -> Result<Self> {
        let status = row.status.parse::<AggregateStatus>().map_err(|e| {
            NotifyError::Internal(format!(
                "通知 {} 的状态字段无法解析: {e}",
                row.notification_id
            ))
        })?;

        Ok(Self {
            notification_id: row.notification_id,
            status,
            channel_statuses: row.channel_statuses.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 基于 sqlx 的状态存储
#[derive(Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行本服务的数据库迁移
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        info!("Running notification_status migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| NotifyError::Database(sqlx::Error::from(e)))?;
        Ok(())
    }

    async fn exists(&self, notification_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notification_status WHERE notification_id = $1)",
        )
        .bind(notification_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl NotificationStatusStore for PgStatusStore {
    async fn create(&self, status: &NotificationStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_status
                (notification_id, status, channel_statuses, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (notification_id) DO NOTHING
            "#,
        )
        .bind(&status.notification_id)
        .bind(status.status.as_str())
        .bind(Json(&status.channel_statuses))
        .bind(status.version)
        .bind(status.created_at)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NotifyError::AlreadyExists {
                entity: ENTITY.to_string(),
                id: status.notification_id.clone(),
            });
        }

        debug!(notification_id = %status.notification_id, "状态记录已创建");
        Ok(())
    }

    async fn get_by_id(&self, notification_id: &str) -> Result<Option<NotificationStatus>> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT notification_id, status, channel_statuses, version, created_at, updated_at
            FROM notification_status
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationStatus::try_from).transpose()
    }

    async fn update(
        &self,
        status: &NotificationStatus,
        expected_version: i64,
    ) -> Result<NotificationStatus> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            UPDATE notification_status
            SET status = $2,
                channel_statuses = $3,
                updated_at = $4,
                version = version + 1
            WHERE notification_id = $1 AND version = $5
            RETURNING notification_id, status, channel_statuses, version, created_at, updated_at
            "#,
        )
        .bind(&status.notification_id)
        .bind(status.status.as_str())
        .bind(Json(&status.channel_statuses))
        .bind(status.updated_at)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None if self.exists(&status.notification_id).await? => {
                Err(NotifyError::VersionConflict {
                    id: status.notification_id.clone(),
                    expected: expected_version,
                })
            }
            None => Err(NotifyError::NotFound {
                entity: ENTITY.to_string(),
                id: status.notification_id.clone(),
            }),
        }
    }

    async fn count_grouped_by_status(&self) -> Result<Vec<(AggregateStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM notification_status
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                status
                    .parse::<AggregateStatus>()
                    .map(|s| (s, count))
                    .map_err(|e| NotifyError::Internal(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_shared::config::DatabaseConfig;
    use notify_shared::database::Database;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_versioned_update_roundtrip() {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        let store = PgStatusStore::new(db.pool().clone());
        store.migrate().await.unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let mut status = NotificationStatus::seeded(&id, &["email".to_string()]);
        store.create(&status).await.unwrap();

        status
            .apply_channel_state("email", ChannelState::Completed)
            .unwrap();
        let stored = store.update(&status, 0).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, AggregateStatus::Completed);

        let err = store.update(&status, 0).await.unwrap_err();
        assert!(matches!(err, NotifyError::VersionConflict { .. }));

        let counts = store.count_grouped_by_status().await.unwrap();
        assert!(
            counts
                .iter()
                .any(|(s, n)| *s == AggregateStatus::Completed && *n >= 1)
        );
    }
}
