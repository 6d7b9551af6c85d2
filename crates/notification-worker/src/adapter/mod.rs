//! 渠道适配器
//!
//! 每个投递渠道（email、sms、push）实现统一的 `ChannelAdapter` trait，
//! 由 `AdapterRegistry` 按渠道名解析。注册表在启动时构建一次，之后只读。
//!
//! ## 支持的渠道
//!
//! - **email**: 邮件
//! - **sms**: 短信
//! - **push**: App 推送

mod email;
mod push;
mod sms;

pub use email::EmailAdapter;
pub use push::PushAdapter;
pub use sms::SmsAdapter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::DispatchConfig;
use tracing::info;

use crate::error::{DispatchError, Result};

/// 渠道适配器 trait
///
/// 适配器应当是无状态的，便于在多个渠道、多个接收者之间并发复用。
/// 失败原因对调用方不透明，这一层不区分可重试与永久失败。
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// 渠道名称（用于日志）
    fn name(&self) -> &str;

    /// 是否处理该渠道
    fn supports(&self, channel: &str) -> bool;

    /// 向单个接收者发送消息
    async fn send(&self, recipient_id: &str, message: &str) -> Result<()>;
}

/// 模拟投递的网络延迟
///
/// 按渠道固定，不随请求变化。接入真实服务后由实际调用耗时取代。
#[derive(Debug, Clone, Copy)]
pub struct SimulatedLatency(pub Duration);

impl SimulatedLatency {
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    async fn wait(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

/// 适配器注册表
///
/// 按注册顺序匹配，第一个 `supports` 返回 true 的适配器生效。
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 email、sms、push 三个默认适配器
    pub fn with_defaults(config: &DispatchConfig) -> Self {
        Self::new()
            .register(Arc::new(EmailAdapter::new(SimulatedLatency::from_millis(
                config.email_latency_ms,
            ))))
            .register(Arc::new(SmsAdapter::new(SimulatedLatency::from_millis(
                config.sms_latency_ms,
            ))))
            .register(Arc::new(PushAdapter::new(SimulatedLatency::from_millis(
                config.push_latency_ms,
            ))))
    }

    pub fn register(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        info!(adapter = adapter.name(), "注册渠道适配器");
        self.adapters.push(adapter);
        self
    }

    /// 解析渠道名对应的适配器
    ///
    /// 未注册的渠道返回 `UnsupportedChannel`；调用方应直接将该渠道记为失败，
    /// 而不是当作一次发送失败处理。
    pub fn resolve(&self, channel: &str) -> Result<Arc<dyn ChannelAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.supports(channel))
            .cloned()
            .ok_or_else(|| DispatchError::UnsupportedChannel {
                channel: channel.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
