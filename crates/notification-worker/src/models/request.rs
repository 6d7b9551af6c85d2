//! 通知请求
//!
//! 调用方提交的原始请求，入队时序列化为消息体，发布后不再修改，也不直接落库。

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// 通知请求
///
/// `metadata` 原样透传，管道不读取其中任何字段。
/// 使用 `BTreeMap` 保证同一请求的序列化结果稳定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channels: Vec<String>,
    pub recipient_ids: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NotificationRequest {
    pub fn new(
        channels: impl IntoIterator<Item = impl Into<String>>,
        recipient_ids: impl IntoIterator<Item = impl Into<String>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            recipient_ids: recipient_ids.into_iter().map(Into::into).collect(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 入队前的同步校验
    ///
    /// 渠道列表会成为状态记录的固定键集合，因此不允许空值和重复值。
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "channels 不能为空".to_string(),
            ));
        }
        if self.recipient_ids.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "recipient_ids 不能为空".to_string(),
            ));
        }
        if self.channels.iter().any(|c| c.trim().is_empty()) {
            return Err(DispatchError::InvalidRequest(
                "channels 中包含空渠道名".to_string(),
            ));
        }
        if self.recipient_ids.iter().any(|r| r.trim().is_empty()) {
            return Err(DispatchError::InvalidRequest(
                "recipient_ids 中包含空接收者".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.channels.len());
        if let Some(dup) = self.channels.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(DispatchError::InvalidRequest(format!(
                "channels 中存在重复渠道: {dup}"
            )));
        }

        Ok(())
    }

    /// 序列化为队列消息体
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DispatchError::Shared(e.into()))
    }

    /// 从队列消息体还原
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| DispatchError::DeserializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let request = NotificationRequest::new(["email", "sms"], ["u1"], "hi");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_lists() {
        let request = NotificationRequest::new(Vec::<String>::new(), ["u1"], "hi");
        assert!(matches!(
            request.validate(),
            Err(DispatchError::InvalidRequest(_))
        ));

        let request = NotificationRequest::new(["email"], Vec::<String>::new(), "hi");
        assert!(matches!(
            request.validate(),
            Err(DispatchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_and_duplicate_channels() {
        let request = NotificationRequest::new(["email", " "], ["u1"], "hi");
        assert!(request.validate().is_err());

        let request = NotificationRequest::new(["email", "sms", "email"], ["u1"], "hi");
        let err = request.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "通知请求不合法: channels 中存在重复渠道: email"
        );
    }

    #[test]
    fn test_payload_is_deterministic_and_keeps_metadata() {
        let request = NotificationRequest::new(["push"], ["u1", "u2"], "hello")
            .with_metadata("zeta", serde_json::json!(1))
            .with_metadata("alpha", serde_json::json!({"nested": true}));

        let first = request.to_payload().unwrap();
        let second = request.clone().to_payload().unwrap();
        assert_eq!(first, second);

        let decoded = NotificationRequest::from_payload(&first).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.metadata["alpha"]["nested"], true);
    }

    #[test]
    fn test_missing_metadata_defaults_to_empty() {
        let payload = br#"{"channels":["email"],"recipient_ids":["u1"],"message":"hi"}"#;
        let request = NotificationRequest::from_payload(payload).unwrap();
        assert!(request.metadata.is_empty());
    }

    #[test]
    fn test_from_payload_rejects_garbage() {
        let err = NotificationRequest::from_payload(b"\x00not json").unwrap_err();
        assert!(matches!(err, DispatchError::DeserializationFailed(_)));
    }
}
