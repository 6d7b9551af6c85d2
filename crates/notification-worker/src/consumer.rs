//! 通知分发消费者
//!
//! 作为消费组成员从 Kafka 拉取通知请求，按请求中的渠道顺序逐个分发：
//! 渠道先置为 PROCESSING，向所有接收者发送后置为 COMPLETED 或 FAILED，
//! 每次转换都会重新计算整体状态。所有渠道处理完毕后才提交位点。

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use notify_shared::config::{AppConfig, DispatchConfig};
use notify_shared::kafka::{ConsumeOptions, ConsumerHealth, ConsumerMessage, KafkaConsumer};
use notify_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{AdapterRegistry, ChannelAdapter};
use crate::aggregator::StatusAggregator;
use crate::error::{DispatchError, Result};
use crate::models::{AggregateStatus, ChannelState, NotificationRequest, NotificationStatus};
use crate::telemetry::DispatchTelemetry;

// ---------------------------------------------------------------------------
// 分发上下文
// ---------------------------------------------------------------------------

/// 单条消息处理的可调参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 单个渠道内同时发送的接收者数量，1 表示按顺序发送
    pub recipient_concurrency: usize,
    /// 单次发送超时，超时记为发送失败
    pub send_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            recipient_concurrency: 1,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            recipient_concurrency: config.recipient_concurrency.max(1),
            send_timeout: config.send_timeout(),
        }
    }
}

/// 处理消息所需的全部依赖
#[derive(Clone)]
pub struct DispatchContext {
    pub registry: AdapterRegistry,
    pub aggregator: StatusAggregator,
    pub telemetry: Arc<dyn DispatchTelemetry>,
    pub settings: DispatchSettings,
}

/// 消息被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 消息体无法反序列化为通知请求
    Undecodable,
    /// 消息缺少 key，无法确定通知 ID
    MissingKey,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undecodable => "undecodable",
            Self::MissingKey => "missing_key",
        }
    }
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// 未做任何处理直接确认
    Dropped { reason: DropReason },
    Processed {
        notification_id: String,
        /// 按请求顺序排列的各渠道最终结果
        channels: Vec<(String, ChannelState)>,
        /// 最后一次成功写入后的整体状态；状态记录不可用时为 `None`
        aggregate: Option<AggregateStatus>,
    },
}

// ---------------------------------------------------------------------------
// 消息处理
// ---------------------------------------------------------------------------

/// 处理单条通知消息
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造 Kafka 消费者。
/// 状态存储出错不会中断投递：记录日志后继续处理剩余渠道。
pub async fn handle_message(ctx: &DispatchContext, msg: &ConsumerMessage) -> MessageOutcome {
    let request = match NotificationRequest::from_payload(&msg.payload) {
        Ok(request) => request,
        Err(e) => {
            error!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "通知消息无法解析，丢弃"
            );
            return drop_message(ctx, DropReason::Undecodable);
        }
    };

    let Some(notification_id) = msg.key.as_deref().filter(|k| !k.is_empty()) else {
        error!(
            error = %DispatchError::MissingMessageKey,
            partition = msg.partition,
            offset = msg.offset,
            "通知消息缺少 key，丢弃"
        );
        return drop_message(ctx, DropReason::MissingKey);
    };

    dispatch_notification(ctx, notification_id, &request).await
}

fn drop_message(ctx: &DispatchContext, reason: DropReason) -> MessageOutcome {
    ctx.telemetry.message_dropped(reason.as_str());
    MessageOutcome::Dropped { reason }
}

/// 按渠道顺序分发一条通知
#[instrument(skip(ctx, request), fields(channels = ?request.channels))]
pub async fn dispatch_notification(
    ctx: &DispatchContext,
    notification_id: &str,
    request: &NotificationRequest,
) -> MessageOutcome {
    info!(recipients = request.recipient_ids.len(), "开始分发通知");

    let mut channels = Vec::with_capacity(request.channels.len());
    let mut aggregate = None;

    for channel in &request.channels {
        let (state, latest) = dispatch_channel(ctx, notification_id, channel, request).await;
        ctx.telemetry.channel_outcome(channel, state);

        if let Some(latest) = latest {
            aggregate = Some(latest.status);
        }
        channels.push((channel.clone(), state));
    }

    match aggregate {
        Some(status) => {
            ctx.telemetry.notification_processed(status);
            info!(aggregate = %status, "通知分发完成");
        }
        None => warn!("通知分发完成，但状态记录未能更新"),
    }

    MessageOutcome::Processed {
        notification_id: notification_id.to_string(),
        channels,
        aggregate,
    }
}

/// 处理单个渠道，返回渠道最终状态和最后一次成功写入的记录
///
/// 未注册的渠道不经过 PROCESSING，直接置为 FAILED，也不调用任何适配器。
async fn dispatch_channel(
    ctx: &DispatchContext,
    notification_id: &str,
    channel: &str,
    request: &NotificationRequest,
) -> (ChannelState, Option<NotificationStatus>) {
    let adapter = match ctx.registry.resolve(channel) {
        Ok(adapter) => adapter,
        Err(e) => {
            warn!(channel, error = %e, "渠道不受支持，直接记为失败");
            let latest = record_transition(ctx, notification_id, channel, ChannelState::Failed).await;
            return (ChannelState::Failed, latest);
        }
    };

    let processing =
        record_transition(ctx, notification_id, channel, ChannelState::Processing).await;

    let state = if send_to_recipients(ctx, adapter.as_ref(), channel, request).await {
        ChannelState::Completed
    } else {
        ChannelState::Failed
    };

    let latest = record_transition(ctx, notification_id, channel, state)
        .await
        .or(processing);
    (state, latest)
}

/// 向所有接收者发送，全部成功才返回 true
///
/// 即使有接收者失败，也会尝试剩余的全部接收者。
/// 并发度大于 1 时所有发送完成后才得出结果。
async fn send_to_recipients(
    ctx: &DispatchContext,
    adapter: &dyn ChannelAdapter,
    channel: &str,
    request: &NotificationRequest,
) -> bool {
    // 先收集成 Vec，stream 类型中不能带闭包，否则消费 future 无法 tokio::spawn
    let sends: Vec<_> = request
        .recipient_ids
        .iter()
        .map(|recipient_id| send_one(ctx, adapter, channel, recipient_id, &request.message))
        .collect();

    let results: Vec<bool> = futures::stream::iter(sends)
        .buffer_unordered(ctx.settings.recipient_concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|ok| !**ok).count();
    if failed > 0 {
        warn!(
            channel,
            adapter = adapter.name(),
            failed,
            total = results.len(),
            "部分接收者发送失败，渠道记为失败"
        );
    }
    failed == 0
}

async fn send_one(
    ctx: &DispatchContext,
    adapter: &dyn ChannelAdapter,
    channel: &str,
    recipient_id: &str,
    message: &str,
) -> bool {
    let timeout = ctx.settings.send_timeout;

    match tokio::time::timeout(timeout, adapter.send(recipient_id, message)).await {
        Ok(Ok(())) => {
            debug!(channel, recipient_id, "发送成功");
            true
        }
        Ok(Err(e)) => {
            warn!(channel, recipient_id, error = %e, "发送失败");
            false
        }
        Err(_) => {
            let e = DispatchError::SendTimeout {
                channel: channel.to_string(),
                recipient_id: recipient_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(channel, recipient_id, error = %e, "发送超时");
            false
        }
    }
}

/// 写入一次渠道状态转换，失败只记录日志
async fn record_transition(
    ctx: &DispatchContext,
    notification_id: &str,
    channel: &str,
    state: ChannelState,
) -> Option<NotificationStatus> {
    match ctx
        .aggregator
        .update_channel_status(notification_id, channel, state)
        .await
    {
        Ok(status) => Some(status),
        Err(e @ DispatchError::StatusNotFound { .. }) => {
            // 入队时初始状态写入失败的通知没有状态记录，照常投递
            warn!(channel, state = %state, error = %e, "状态记录不存在，跳过状态更新");
            None
        }
        Err(e) => {
            error!(channel, state = %state, error = %e, "更新渠道状态失败");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// 消费者
// ---------------------------------------------------------------------------

/// 通知分发消费者（消费组中的一个成员）
pub struct DispatchConsumer {
    consumer: KafkaConsumer,
    topic: String,
    options: ConsumeOptions,
    context: DispatchContext,
    health: watch::Sender<ConsumerHealth>,
}

impl DispatchConsumer {
    pub fn new(config: &AppConfig, context: DispatchContext) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka)?;
        let dispatch = &config.dispatch;

        let options = ConsumeOptions {
            // 拉取失败不限次数重试，只限制单次等待上限
            backoff: RetryPolicy::from_millis(
                0,
                dispatch.reconnect_initial_delay_ms,
                dispatch.reconnect_max_delay_ms,
            ),
            unhealthy_after_errors: dispatch.unhealthy_after_errors,
        };
        let (health, _) = watch::channel(ConsumerHealth::Healthy);

        Ok(Self {
            consumer,
            topic: dispatch.topic.clone(),
            options,
            context,
            health,
        })
    }

    /// 订阅消费者健康状态
    pub fn health(&self) -> watch::Receiver<ConsumerHealth> {
        self.health.subscribe()
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            consumer,
            topic,
            options,
            context,
            health,
        } = self;

        consumer.subscribe(&[topic.as_str()])?;
        info!(topic = %topic, group_id = consumer.group_id(), "通知分发消费者已启动");

        consumer
            .start(shutdown, options, health, |msg| {
                let context = &context;
                async move {
                    match handle_message(context, &msg).await {
                        MessageOutcome::Dropped { reason } => {
                            debug!(offset = msg.offset, reason = reason.as_str(), "消息已丢弃");
                        }
                        MessageOutcome::Processed {
                            aggregate: None,
                            notification_id,
                            ..
                        } => {
                            // 位点照常提交，状态需通过外部回调或人工修复
                            warn!(notification_id = %notification_id, offset = msg.offset, "消息已处理但状态未落库");
                        }
                        MessageOutcome::Processed { .. } => {}
                    }
                    Ok::<(), DispatchError>(())
                }
            })
            .await;

        info!("通知分发消费者已停止");
        Ok(())
    }
}

/// 将健康状态变化转发给遥测端口，直到发送端关闭
pub async fn report_health(
    mut health: watch::Receiver<ConsumerHealth>,
    telemetry: Arc<dyn DispatchTelemetry>,
) {
    telemetry.consumer_health(&health.borrow_and_update());

    while health.changed().await.is_ok() {
        let current = *health.borrow_and_update();
        match &current {
            ConsumerHealth::Unhealthy { consecutive_errors } => {
                error!(consecutive_errors, "通知分发消费者不健康");
            }
            ConsumerHealth::Degraded { consecutive_errors } => {
                warn!(consecutive_errors, "通知分发消费者降级");
            }
            ConsumerHealth::Healthy => info!("通知分发消费者恢复健康"),
        }
        telemetry.consumer_health(&current);
    }
}
