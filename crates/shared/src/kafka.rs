//! Kafka 生产者与消费组封装
//!
//! 基于 rdkafka 的 FutureProducer / StreamConsumer，
//! 把 rdkafka 错误映射为 `NotifyError`，并在消费端管理位点提交与健康状态。
//!
//! 消费端关闭自动提交：每条消息在 handler 返回后才提交位点，
//! 进程在提交前崩溃时消息会被重新投递给消费组内的其他成员（至少一次语义）。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::NotifyError;
use crate::retry::{Backoff, RetryPolicy};

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 一条已消费的 Kafka 消息
///
/// 从 `BorrowedMessage` 复制出所有字段，脱离 consumer 的借用，
/// 处理函数可以在多个 await 之间持有它。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 通知请求的 Kafka 生产者
///
/// `FutureProducer` 内部是 Arc 包装的，Clone 代价很低。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, NotifyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| NotifyError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka producer ready");
        Ok(Self {
            producer,
            delivery_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息，返回 (partition, offset)
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), NotifyError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(e, _)| NotifyError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// ConsumerHealth
// ---------------------------------------------------------------------------

/// 消费者健康状态
///
/// 由消费循环根据连续拉取失败次数维护，通过 `watch` channel 对外暴露。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerHealth {
    /// 尚未拉取过消息或最近一次拉取成功
    Healthy,
    /// 出现连续失败但未达阈值
    Degraded { consecutive_errors: u32 },
    /// 连续失败达到阈值，仍在按上限间隔重试
    Unhealthy { consecutive_errors: u32 },
}

impl ConsumerHealth {
    pub fn from_errors(consecutive_errors: u32, unhealthy_after: u32) -> Self {
        match consecutive_errors {
            0 => Self::Healthy,
            n if n >= unhealthy_after => Self::Unhealthy {
                consecutive_errors: n,
            },
            n => Self::Degraded {
                consecutive_errors: n,
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// 消费循环的退避与健康判定参数
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub backoff: RetryPolicy,
    pub unhealthy_after_errors: u32,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            backoff: RetryPolicy::from_millis(0, 1000, 30_000),
            unhealthy_after_errors: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 消费组成员，手动提交位点
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者并加入配置中的消费组
    pub fn new(config: &KafkaConfig) -> Result<Self, NotifyError> {
        let group_id = config.consumer_group.clone();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| NotifyError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka consumer ready");
        Ok(Self { consumer, group_id })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 加入消费组并订阅 topic
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), NotifyError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| NotifyError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "Subscribed to Kafka topics");
        Ok(())
    }

    /// 提交单条消息的位点（下一条待消费的位置）
    fn commit(&self, msg: &ConsumerMessage) -> Result<(), NotifyError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| NotifyError::Kafka(format!("构造提交位点失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| NotifyError::Kafka(format!("提交位点失败: {e}")))
    }

    /// 启动消费循环
    ///
    /// - 收到消息时调用 handler；handler 返回后（无论成功与否）提交位点，
    ///   handler 的错误只记录日志，单条坏消息不会阻塞整个分区。
    /// - 拉取出错时按 `options.backoff` 指数退避后继续，等待时间有上限，不限次数；
    ///   每次状态变化都会写入 `health`。
    /// - 关闭信号变为 `true` 时在两条消息之间退出。
    pub async fn start<F, Fut, E>(
        self,
        mut shutdown: watch::Receiver<bool>,
        options: ConsumeOptions,
        health: watch::Sender<ConsumerHealth>,
        handler: F,
    ) where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        let mut backoff = Backoff::new(options.backoff.clone());

        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // biased：先检查关闭信号
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Kafka 消费循环已停止");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流已关闭，退出消费循环");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            drop(borrowed_msg);

                            if backoff.on_success() > 0 {
                                info!("Kafka 拉取恢复正常");
                            }
                            health.send_if_modified(|current| {
                                let changed = !current.is_healthy();
                                *current = ConsumerHealth::Healthy;
                                changed
                            });

                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            if let Err(e) = handler(msg.clone()).await {
                                error!(error = %e, offset = msg.offset, "处理 Kafka 消息失败");
                            }

                            if let Err(e) = self.commit(&msg) {
                                // 提交失败不影响后续消费，最坏情况是该消息被重复投递
                                warn!(error = %e, offset = msg.offset, "提交位点失败，消息可能被重复投递");
                            }
                        }
                        Err(e) => {
                            let delay = backoff.on_failure();
                            let state = ConsumerHealth::from_errors(
                                backoff.consecutive_failures(),
                                options.unhealthy_after_errors,
                            );
                            health.send_replace(state);

                            error!(
                                error = %e,
                                consecutive_errors = backoff.consecutive_failures(),
                                delay_ms = delay.as_millis() as u64,
                                "接收 Kafka 消息出错，退避后重试"
                            );

                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                changed = shutdown.changed() => {
                                    if changed.is_err() || *shutdown.borrow() {
                                        info!("退避期间收到关闭信号，Kafka 消费循环退出");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_health_thresholds() {
        assert_eq!(ConsumerHealth::from_errors(0, 3), ConsumerHealth::Healthy);
        assert_eq!(
            ConsumerHealth::from_errors(2, 3),
            ConsumerHealth::Degraded {
                consecutive_errors: 2
            }
        );
        assert_eq!(
            ConsumerHealth::from_errors(3, 3),
            ConsumerHealth::Unhealthy {
                consecutive_errors: 3
            }
        );
        assert!(ConsumerHealth::Healthy.is_healthy());
        assert!(!ConsumerHealth::from_errors(7, 3).is_healthy());
    }

    #[test]
    fn test_default_consume_options() {
        let options = ConsumeOptions::default();
        assert_eq!(options.unhealthy_after_errors, 5);
        assert_eq!(options.backoff.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(options.backoff.delay_for_attempt(10), Duration::from_secs(30));
    }
}
