//! 状态聚合
//!
//! 状态记录的所有写入都经过这里：入队时创建初始记录，消费者和外部回调逐渠道更新。
//! 每次更新都是一次“读取 - 修改单个渠道 - 按版本写回”，版本冲突时重新读取再写，
//! 并发更新同一通知的不同渠道不会互相覆盖。

use std::sync::Arc;

use notify_shared::error::NotifyError;
use notify_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{debug, info, instrument, warn};

use crate::error::{DispatchError, Result};
use crate::models::{ChannelState, NotificationStatus};
use crate::store::NotificationStatusStore;

/// 状态聚合器
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn NotificationStatusStore>,
    /// 存储层瞬时错误（连接、超时）的重试策略
    retry: RetryPolicy,
    max_conflict_retries: u32,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn NotificationStatusStore>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            max_conflict_retries,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStatusStore> {
        &self.store
    }

    /// 创建初始记录：每个渠道 PENDING，整体 ENQUEUED
    #[instrument(skip(self, channels))]
    pub async fn seed(&self, notification_id: &str, channels: &[String]) -> Result<NotificationStatus> {
        let status = NotificationStatus::seeded(notification_id, channels);

        retry_with_policy(
            &self.retry,
            "seed_notification_status",
            NotifyError::is_retryable,
            || self.store.create(&status),
        )
        .await?;

        debug!(channels = channels.len(), "初始状态已写入");
        Ok(status)
    }

    /// 查询状态，记录不存在时返回 `None`
    pub async fn get_status(&self, notification_id: &str) -> Result<Option<NotificationStatus>> {
        let status = retry_with_policy(
            &self.retry,
            "get_notification_status",
            NotifyError::is_retryable,
            || self.store.get_by_id(notification_id),
        )
        .await?;

        Ok(status)
    }

    /// 更新单个渠道状态并重新计算整体状态
    ///
    /// 记录不存在返回 `StatusNotFound`，渠道不在记录中返回 `UnknownChannel`。
    #[instrument(skip(self))]
    pub async fn update_channel_status(
        &self,
        notification_id: &str,
        channel: &str,
        state: ChannelState,
    ) -> Result<NotificationStatus> {
        let mut conflicts: u32 = 0;

        loop {
            let mut status = self.get_status(notification_id).await?.ok_or_else(|| {
                DispatchError::StatusNotFound {
                    notification_id: notification_id.to_string(),
                }
            })?;

            let expected_version = status.version;
            status.apply_channel_state(channel, state)?;

            let written = retry_with_policy(
                &self.retry,
                "update_notification_status",
                NotifyError::is_retryable,
                || self.store.update(&status, expected_version),
            )
            .await;

            match written {
                Ok(stored) => {
                    debug!(
                        aggregate = %stored.status,
                        version = stored.version,
                        "渠道状态已更新"
                    );
                    return Ok(stored);
                }
                Err(NotifyError::VersionConflict { .. }) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    debug!(conflicts, "状态版本冲突，重新读取后重试");
                }
                Err(e @ NotifyError::VersionConflict { .. }) => {
                    warn!(conflicts, "状态版本冲突次数超过上限，放弃本次更新");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 外部渠道服务的状态回调
    ///
    /// 状态字符串大小写不敏感；未知状态、未知渠道、不存在的记录都会被拒绝，
    /// 记录保持不变。
    #[instrument(skip(self))]
    pub async fn apply_external_update(
        &self,
        notification_id: &str,
        channel: &str,
        raw_status: &str,
    ) -> Result<NotificationStatus> {
        let state: ChannelState = raw_status.parse()?;
        let stored = self
            .update_channel_status(notification_id, channel, state)
            .await?;

        info!(aggregate = %stored.status, "外部状态回调已应用");
        Ok(stored)
    }
}
