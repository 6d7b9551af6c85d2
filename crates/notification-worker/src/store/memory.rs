//! 内存状态存储
//!
//! 供 `memory` 后端和测试使用，语义与 PostgreSQL 实现一致。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use notify_shared::error::{NotifyError, Result};

use super::NotificationStatusStore;
use crate::models::{AggregateStatus, NotificationStatus};

const ENTITY: &str = "NotificationStatus";

#[derive(Default)]
pub struct InMemoryStatusStore {
    records: DashMap<String, NotificationStatus>,
    unavailable: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用，之后所有调用返回错误，直到恢复
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotifyError::Internal("状态存储不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStatusStore for InMemoryStatusStore {
    async fn create(&self, status: &NotificationStatus) -> Result<()> {
        self.check_available()?;

        match self.records.entry(status.notification_id.clone()) {
            Entry::Occupied(_) => Err(NotifyError::AlreadyExists {
                entity: ENTITY.to_string(),
                id: status.notification_id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(status.clone());
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, notification_id: &str) -> Result<Option<NotificationStatus>> {
        self.check_available()?;
        Ok(self.records.get(notification_id).map(|r| r.value().clone()))
    }

    async fn update(
        &self,
        status: &NotificationStatus,
        expected_version: i64,
    ) -> Result<NotificationStatus> {
        self.check_available()?;

        // 持有分片写锁期间完成版本比较与覆盖
        let mut current = self
            .records
            .get_mut(&status.notification_id)
            .ok_or_else(|| NotifyError::NotFound {
                entity: ENTITY.to_string(),
                id: status.notification_id.clone(),
            })?;

        if current.version != expected_version {
            return Err(NotifyError::VersionConflict {
                id: status.notification_id.clone(),
                expected: expected_version,
            });
        }

        let mut next = status.clone();
        next.created_at = current.created_at;
        next.version = expected_version + 1;
        *current = next.clone();

        Ok(next)
    }

    async fn count_grouped_by_status(&self) -> Result<Vec<(AggregateStatus, i64)>> {
        self.check_available()?;

        let mut counts: HashMap<AggregateStatus, i64> = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.status).or_insert(0) += 1;
        }

        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelState;

    fn seeded(id: &str) -> NotificationStatus {
        NotificationStatus::seeded(id, &["email".to_string(), "sms".to_string()])
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStatusStore::new();
        store.create(&seeded("n-1")).await.unwrap();

        let found = store.get_by_id("n-1").await.unwrap().unwrap();
        assert_eq!(found.status, AggregateStatus::Enqueued);
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let store = InMemoryStatusStore::new();
        store.create(&seeded("n-1")).await.unwrap();

        let err = store.create(&seeded("n-1")).await.unwrap_err();
        assert!(matches!(err, NotifyError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_detects_conflict() {
        let store = InMemoryStatusStore::new();
        let mut status = seeded("n-1");
        store.create(&status).await.unwrap();

        status
            .apply_channel_state("email", ChannelState::Processing)
            .unwrap();
        let stored = store.update(&status, 0).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, AggregateStatus::Processing);

        // 基于旧版本的写入被拒绝，已存储的记录不变
        let err = store.update(&status, 0).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::VersionConflict { expected: 0, .. }
        ));
        assert_eq!(store.get_by_id("n-1").await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryStatusStore::new();
        let err = store.update(&seeded("n-1"), 0).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_count_grouped_by_status() {
        let store = InMemoryStatusStore::new();
        store.create(&seeded("n-1")).await.unwrap();
        store.create(&seeded("n-2")).await.unwrap();

        let mut done = seeded("n-3");
        store.create(&done).await.unwrap();
        done.apply_channel_state("email", ChannelState::Completed)
            .unwrap();
        done.apply_channel_state("sms", ChannelState::Completed)
            .unwrap();
        store.update(&done, 0).await.unwrap();

        let counts: HashMap<_, _> = store
            .count_grouped_by_status()
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(counts[&AggregateStatus::Enqueued], 2);
        assert_eq!(counts[&AggregateStatus::Completed], 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryStatusStore::new();
        store.set_unavailable(true);

        tokio_test::assert_err!(store.create(&seeded("n-1")).await);
        tokio_test::assert_err!(store.get_by_id("n-1").await);
        tokio_test::assert_err!(store.count_grouped_by_status().await);

        store.set_unavailable(false);
        tokio_test::assert_ok!(store.create(&seeded("n-1")).await);
    }
}
