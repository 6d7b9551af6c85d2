//! 通知状态模型
//!
//! 状态记录由生产者创建一次，此后由消费者（以及外部回调）逐渠道更新。
//! 聚合状态 `status` 是渠道状态的派生字段，每次写入都重新计算。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// 单个渠道的投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 外部回调传入的状态字符串大小写不敏感
impl FromStr for ChannelState {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(DispatchError::InvalidStatus(s.to_string())),
        }
    }
}

/// 通知整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    Enqueued,
    Processing,
    Completed,
    PartialFailure,
    /// 聚合规则不会产生该值，只可能来自初始写入或带外写入
    Failed,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENQUEUED" => Ok(Self::Enqueued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "PARTIAL_FAILURE" => Ok(Self::PartialFailure),
            "FAILED" => Ok(Self::Failed),
            _ => Err(DispatchError::InvalidStatus(s.to_string())),
        }
    }
}

/// 由渠道状态推导整体状态
///
/// 全部 COMPLETED -> COMPLETED；否则存在 FAILED -> PARTIAL_FAILURE；否则 PROCESSING。
/// 即使所有渠道都失败也得到 PARTIAL_FAILURE，FAILED 不会由此产生。
pub fn aggregate_status<'a>(states: impl IntoIterator<Item = &'a ChannelState>) -> AggregateStatus {
    let mut all_completed = true;
    let mut any_failed = false;

    for state in states {
        all_completed &= *state == ChannelState::Completed;
        any_failed |= *state == ChannelState::Failed;
    }

    if all_completed {
        AggregateStatus::Completed
    } else if any_failed {
        AggregateStatus::PartialFailure
    } else {
        AggregateStatus::Processing
    }
}

/// 通知状态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationStatus {
    pub notification_id: String,
    pub status: AggregateStatus,
    pub channel_statuses: BTreeMap<String, ChannelState>,
    /// 乐观锁版本号，创建时为 0，每次成功更新加 1
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationStatus {
    /// 入队时的初始记录：每个渠道 PENDING，整体 ENQUEUED
    pub fn seeded(notification_id: impl Into<String>, channels: &[String]) -> Self {
        let now = Utc::now();
        Self {
            notification_id: notification_id.into(),
            status: AggregateStatus::Enqueued,
            channel_statuses: channels
                .iter()
                .map(|c| (c.clone(), ChannelState::Pending))
                .collect(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel_state(&self, channel: &str) -> Option<ChannelState> {
        self.channel_statuses.get(channel).copied()
    }

    /// 修改单个渠道状态并重新计算整体状态
    ///
    /// 渠道键在创建时固定，未登记的渠道返回 `UnknownChannel`，记录保持不变。
    pub fn apply_channel_state(&mut self, channel: &str, state: ChannelState) -> Result<()> {
        let Some(slot) = self.channel_statuses.get_mut(channel) else {
            return Err(DispatchError::UnknownChannel {
                notification_id: self.notification_id.clone(),
                channel: channel.to_string(),
            });
        };

        *slot = state;
        self.status = aggregate_status(self.channel_statuses.values());
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// 通知统计
///
/// 每次查询时由状态分组计数实时计算，不落库。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMetrics {
    pub total_sent: i64,
    pub total_success: i64,
    pub total_failed: i64,
    pub by_status: HashMap<AggregateStatus, i64>,
}

impl NotificationMetrics {
    pub fn from_counts(counts: impl IntoIterator<Item = (AggregateStatus, i64)>) -> Self {
        let mut metrics = Self::default();

        for (status, count) in counts {
            *metrics.by_status.entry(status).or_insert(0) += count;
            metrics.total_sent += count;

            match status {
                AggregateStatus::Completed => metrics.total_success += count,
                AggregateStatus::Failed => metrics.total_failed += count,
                _ => {}
            }
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ChannelState; 4] = [
        ChannelState::Pending,
        ChannelState::Processing,
        ChannelState::Completed,
        ChannelState::Failed,
    ];

    /// 按定义独立计算的期望值
    fn expected(states: &[ChannelState]) -> AggregateStatus {
        if states.iter().all(|s| *s == ChannelState::Completed) {
            AggregateStatus::Completed
        } else if states.contains(&ChannelState::Failed) {
            AggregateStatus::PartialFailure
        } else {
            AggregateStatus::Processing
        }
    }

    #[test]
    fn test_aggregation_is_total_over_three_channels() {
        // 枚举 3 个渠道的全部 64 种组合
        for a in ALL_STATES {
            for b in ALL_STATES {
                for c in ALL_STATES {
                    let states = [a, b, c];
                    let got = aggregate_status(states.iter());
                    assert_eq!(got, expected(&states), "states={states:?}");
                    assert_ne!(got, AggregateStatus::Failed);
                    assert_ne!(got, AggregateStatus::Enqueued);
                }
            }
        }
    }

    #[test]
    fn test_all_failed_is_partial_failure() {
        let states = [ChannelState::Failed, ChannelState::Failed];
        assert_eq!(
            aggregate_status(states.iter()),
            AggregateStatus::PartialFailure
        );
    }

    #[test]
    fn test_seeded_record() {
        let channels = vec!["email".to_string(), "sms".to_string()];
        let status = NotificationStatus::seeded("n-1", &channels);

        assert_eq!(status.status, AggregateStatus::Enqueued);
        assert_eq!(status.version, 0);
        assert_eq!(
            status.channel_statuses.keys().cloned().collect::<Vec<_>>(),
            channels
        );
        assert!(
            status
                .channel_statuses
                .values()
                .all(|s| *s == ChannelState::Pending)
        );
    }

    #[test]
    fn test_apply_channel_state_recomputes_aggregate() {
        let channels = vec!["email".to_string(), "sms".to_string()];
        let mut status = NotificationStatus::seeded("n-1", &channels);

        status
            .apply_channel_state("email", ChannelState::Processing)
            .unwrap();
        assert_eq!(status.status, AggregateStatus::Processing);

        status
            .apply_channel_state("email", ChannelState::Completed)
            .unwrap();
        status.apply_channel_state("sms", ChannelState::Failed).unwrap();
        assert_eq!(status.status, AggregateStatus::PartialFailure);

        status
            .apply_channel_state("sms", ChannelState::Completed)
            .unwrap();
        assert_eq!(status.status, AggregateStatus::Completed);
    }

    #[test]
    fn test_apply_unknown_channel_leaves_record_untouched() {
        let mut status = NotificationStatus::seeded("n-1", &["email".to_string()]);
        let before = status.clone();

        let err = status
            .apply_channel_state("voice", ChannelState::Failed)
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownChannel { .. }));
        assert_eq!(status, before);
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(
            "completed".parse::<ChannelState>().unwrap(),
            ChannelState::Completed
        );
        assert_eq!(
            " Failed ".parse::<ChannelState>().unwrap(),
            ChannelState::Failed
        );
        assert!("DELIVERED".parse::<ChannelState>().is_err());
        assert_eq!(
            "partial_failure".parse::<AggregateStatus>().unwrap(),
            AggregateStatus::PartialFailure
        );
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&AggregateStatus::PartialFailure).unwrap();
        assert_eq!(json, "\"PARTIAL_FAILURE\"");
        let json = serde_json::to_string(&ChannelState::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }

    #[test]
    fn test_metrics_from_counts() {
        let metrics = NotificationMetrics::from_counts([
            (AggregateStatus::Completed, 7),
            (AggregateStatus::PartialFailure, 2),
            (AggregateStatus::Failed, 1),
            (AggregateStatus::Enqueued, 3),
        ]);

        assert_eq!(metrics.total_sent, 13);
        assert_eq!(metrics.total_success, 7);
        assert_eq!(metrics.total_failed, 1);
        assert_eq!(metrics.by_status[&AggregateStatus::PartialFailure], 2);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["by_status"]["COMPLETED"], 7);
    }
}
