//! 通知分发管道
//!
//! 生产者写入初始状态并把通知请求发布到 Kafka，消费组成员拉取请求后逐渠道分发，
//! 并把渠道结果汇总为通知的整体状态。状态与统计可随时通过状态存储查询。

pub mod adapter;
pub mod aggregator;
pub mod consumer;
pub mod error;
pub mod metrics_aggregator;
pub mod models;
pub mod producer;
pub mod store;
pub mod telemetry;

pub use aggregator::StatusAggregator;
pub use consumer::{DispatchConsumer, DispatchContext, DispatchSettings, MessageOutcome};
pub use metrics_aggregator::MetricsAggregator;
pub use producer::{DispatchProducer, KafkaPublisher, NotificationPublisher};
