//! 分发管道遥测
//!
//! 管道组件通过注入的 `DispatchTelemetry` 上报运行事件，不直接调用全局的指标宏，
//! 测试中可替换为记录型实现后断言。

use notify_shared::kafka::ConsumerHealth;

use crate::models::{AggregateStatus, ChannelState};

/// 分发管道遥测端口
pub trait DispatchTelemetry: Send + Sync {
    /// 通知已发布到队列
    fn notification_enqueued(&self);

    /// 入队时初始状态写入失败（通知仍会发布）
    fn status_seed_failed(&self, notification_id: &str);

    /// 消费到的消息未经处理被丢弃
    fn message_dropped(&self, reason: &str);

    /// 单个渠道的最终结果
    fn channel_outcome(&self, channel: &str, state: ChannelState);

    /// 通知处理完毕时的整体状态
    fn notification_processed(&self, aggregate: AggregateStatus);

    fn consumer_health(&self, health: &ConsumerHealth);
}

/// 基于 `metrics` 门面的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetry;

impl DispatchTelemetry for MetricsTelemetry {
    fn notification_enqueued(&self) {
        metrics::counter!("notifications_enqueued_total").increment(1);
    }

    fn status_seed_failed(&self, _notification_id: &str) {
        metrics::counter!("notification_status_seed_failures_total").increment(1);
    }

    fn message_dropped(&self, reason: &str) {
        metrics::counter!(
            "notification_messages_dropped_total",
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn channel_outcome(&self, channel: &str, state: ChannelState) {
        metrics::counter!(
            "notification_channel_outcomes_total",
            "channel" => channel.to_string(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    fn notification_processed(&self, aggregate: AggregateStatus) {
        metrics::counter!(
            "notifications_processed_total",
            "status" => aggregate.as_str()
        )
        .increment(1);
    }

    fn consumer_health(&self, health: &ConsumerHealth) {
        let value = if health.is_healthy() { 1.0 } else { 0.0 };
        metrics::gauge!("notification_consumer_healthy").set(value);
    }
}

/// 不上报任何内容
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl DispatchTelemetry for NoopTelemetry {
    fn notification_enqueued(&self) {}
    fn status_seed_failed(&self, _notification_id: &str) {}
    fn message_dropped(&self, _reason: &str) {}
    fn channel_outcome(&self, _channel: &str, _state: ChannelState) {}
    fn notification_processed(&self, _aggregate: AggregateStatus) {}
    fn consumer_health(&self, _health: &ConsumerHealth) {}
}
