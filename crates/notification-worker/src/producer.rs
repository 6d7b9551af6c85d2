//! 通知分发生产者
//!
//! `enqueue` 依次完成：校验请求、生成通知 ID、写入初始状态、发布到队列。
//! 初始状态写入失败只记录不中断，发布失败则直接返回给调用方。

use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::error::Result as SharedResult;
use notify_shared::kafka::KafkaProducer;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::aggregator::StatusAggregator;
use crate::error::Result;
use crate::models::NotificationRequest;
use crate::telemetry::DispatchTelemetry;

/// 消息发布端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// 以通知 ID 为 key 发布一条消息
    async fn publish(&self, key: &str, payload: &[u8]) -> SharedResult<()>;
}

/// 发布到固定 topic 的 Kafka 实现
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl NotificationPublisher for KafkaPublisher {
    async fn publish(&self, key: &str, payload: &[u8]) -> SharedResult<()> {
        self.producer.send(&self.topic, key, payload).await?;
        Ok(())
    }
}

pub struct DispatchProducer {
    aggregator: StatusAggregator,
    publisher: Arc<dyn NotificationPublisher>,
    telemetry: Arc<dyn DispatchTelemetry>,
}

impl DispatchProducer {
    pub fn new(
        aggregator: StatusAggregator,
        publisher: Arc<dyn NotificationPublisher>,
        telemetry: Arc<dyn DispatchTelemetry>,
    ) -> Self {
        Self {
            aggregator,
            publisher,
            telemetry,
        }
    }

    /// 入队一条通知，返回通知 ID
    ///
    /// 返回成功后状态记录可能仍不存在（初始写入失败的情况），
    /// 此时查询状态得到“不存在”，消息本身照常投递。
    #[instrument(
        skip(self, request),
        fields(
            channels = request.channels.len(),
            recipients = request.recipient_ids.len()
        )
    )]
    pub async fn enqueue(&self, request: &NotificationRequest) -> Result<String> {
        request.validate()?;

        let notification_id = Uuid::new_v4().to_string();

        if let Err(e) = self
            .aggregator
            .seed(&notification_id, &request.channels)
            .await
        {
            error!(
                notification_id = %notification_id,
                error = %e,
                "写入初始状态失败，继续发布"
            );
            self.telemetry.status_seed_failed(&notification_id);
        }

        let payload = request.to_payload()?;
        self.publisher.publish(&notification_id, &payload).await?;
        self.telemetry.notification_enqueued();

        info!(notification_id = %notification_id, "通知已入队");
        Ok(notification_id)
    }
}
