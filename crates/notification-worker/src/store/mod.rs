//! 通知状态存储
//!
//! 状态记录以 `notification_id` 为键。更新采用乐观锁：调用方提交读取时的版本号，
//! 存储层仅在版本一致时覆盖整条记录并将版本加 1，否则返回 `VersionConflict`，
//! 由调用方重新读取后再写。

mod memory;
mod postgres;

pub use memory::InMemoryStatusStore;
pub use postgres::PgStatusStore;

use async_trait::async_trait;
use notify_shared::error::Result;

use crate::models::{AggregateStatus, NotificationStatus};

/// 通知状态存储 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStatusStore: Send + Sync {
    /// 写入新记录，id 已存在时返回 `AlreadyExists`
    async fn create(&self, status: &NotificationStatus) -> Result<()>;

    async fn get_by_id(&self, notification_id: &str) -> Result<Option<NotificationStatus>>;

    /// 按版本号覆盖整条记录，返回写入后的记录（版本已加 1）
    ///
    /// 记录不存在返回 `NotFound`，版本不一致返回 `VersionConflict`。
    async fn update(
        &self,
        status: &NotificationStatus,
        expected_version: i64,
    ) -> Result<NotificationStatus>;

    /// 按整体状态分组计数
    async fn count_grouped_by_status(&self) -> Result<Vec<(AggregateStatus, i64)>>;
}
