//! SMS 短信渠道
//!
//! 模拟实现。短信服务商的调用最慢，默认延迟也最长。

use async_trait::async_trait;
use tracing::info;

use super::{ChannelAdapter, SimulatedLatency};
use crate::error::Result;

pub struct SmsAdapter {
    latency: SimulatedLatency,
}

impl SmsAdapter {
    pub fn new(latency: SimulatedLatency) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn name(&self) -> &str {
        "SMS"
    }

    fn supports(&self, channel: &str) -> bool {
        channel == "sms"
    }

    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        self.latency.wait().await;

        info!(recipient_id, len = message.len(), "模拟发送短信");
        Ok(())
    }
}
