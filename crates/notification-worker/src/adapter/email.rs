//! Email 邮件渠道
//!
//! 当前为模拟实现，生产环境需要接入真实的邮件服务（如 SendGrid、AWS SES）。

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ChannelAdapter, SimulatedLatency};
use crate::error::Result;

pub struct EmailAdapter {
    latency: SimulatedLatency,
}

impl EmailAdapter {
    pub fn new(latency: SimulatedLatency) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn name(&self) -> &str {
        "Email"
    }

    fn supports(&self, channel: &str) -> bool {
        channel == "email"
    }

    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        debug!(recipient_id, content_length = message.len(), "Email 发送中...");

        self.latency.wait().await;

        info!(recipient_id, "Email 发送成功");
        Ok(())
    }
}
