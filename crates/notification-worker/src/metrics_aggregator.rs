//! 通知统计
//!
//! 统计数据不落库，每次查询时由状态存储的分组计数实时得出。

use std::sync::Arc;

use notify_shared::error::NotifyError;
use notify_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::Result;
use crate::models::NotificationMetrics;
use crate::store::NotificationStatusStore;

#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn NotificationStatusStore>,
    retry: RetryPolicy,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn NotificationStatusStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// 按整体状态汇总
    ///
    /// `total_failed` 只统计整体状态为 FAILED 的通知；正常分发流程不会产生该状态，
    /// 渠道失败体现在 PARTIAL_FAILURE 计数中。
    pub async fn get_metrics(&self) -> Result<NotificationMetrics> {
        let counts = retry_with_policy(
            &self.retry,
            "count_notifications_by_status",
            NotifyError::is_retryable,
            || self.store.count_grouped_by_status(),
        )
        .await?;

        Ok(NotificationMetrics::from_counts(counts))
    }
}
