//! 领域模型

mod request;
mod status;

pub use request::NotificationRequest;
pub use status::{
    AggregateStatus, ChannelState, NotificationMetrics, NotificationStatus, aggregate_status,
};
