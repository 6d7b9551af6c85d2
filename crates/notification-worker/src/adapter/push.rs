//! App 推送渠道

use async_trait::async_trait;
use tracing::info;

use super::{ChannelAdapter, SimulatedLatency};
use crate::error::Result;

/// 模拟 App 推送
///
/// 生产环境中替换为 APNs / FCM 等推送服务的调用
pub struct PushAdapter {
    latency: SimulatedLatency,
}

impl PushAdapter {
    pub fn new(latency: SimulatedLatency) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn name(&self) -> &str {
        "Push"
    }

    fn supports(&self, channel: &str) -> bool {
        channel == "push"
    }

    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        self.latency.wait().await;

        info!(
            recipient_id,
            body_length = message.len(),
            "模拟发送 App 推送"
        );
        Ok(())
    }
}
