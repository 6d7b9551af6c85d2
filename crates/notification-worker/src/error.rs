//! 通知分发错误类型
//!
//! 区分请求校验、渠道解析、渠道发送、状态记录和消息解码等失败原因，
//! 便于上层决定是拒绝请求、记为渠道失败，还是丢弃消息。

use notify_shared::error::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// 请求不合法，同步拒绝，不会入队
    #[error("通知请求不合法: {0}")]
    InvalidRequest(String),

    /// 注册表中没有支持该渠道的适配器，渠道直接记为失败
    #[error("不支持的渠道: {channel}")]
    UnsupportedChannel { channel: String },

    #[error("通知发送失败: 渠道={channel}, 接收者={recipient_id}, 原因={reason}")]
    SendFailed {
        channel: String,
        recipient_id: String,
        reason: String,
    },

    #[error("通知发送超时: 渠道={channel}, 接收者={recipient_id}, 超时={timeout_ms}ms")]
    SendTimeout {
        channel: String,
        recipient_id: String,
        timeout_ms: u64,
    },

    #[error("通知状态不存在: {notification_id}")]
    StatusNotFound { notification_id: String },

    /// 渠道键在创建时已固定，不允许更新未登记的渠道
    #[error("通知未登记该渠道: notification_id={notification_id}, 渠道={channel}")]
    UnknownChannel {
        notification_id: String,
        channel: String,
    },

    #[error("无法识别的状态值: {0}")]
    InvalidStatus(String),

    #[error("通知反序列化失败: {0}")]
    DeserializationFailed(String),

    #[error("消息缺少通知 ID（消息 key 为空）")]
    MissingMessageKey,

    #[error(transparent)]
    Shared(#[from] NotifyError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::SendFailed {
            channel: "sms".to_string(),
            recipient_id: "u1".to_string(),
            reason: "网络超时".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "通知发送失败: 渠道=sms, 接收者=u1, 原因=网络超时"
        );

        let err = DispatchError::UnsupportedChannel {
            channel: "voice".to_string(),
        };
        assert_eq!(err.to_string(), "不支持的渠道: voice");

        let shared_err = NotifyError::Kafka("broker 不可达".to_string());
        let err = DispatchError::from(shared_err);
        assert_eq!(err.to_string(), "Kafka 错误: broker 不可达");
    }
}
