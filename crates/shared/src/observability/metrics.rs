//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_dispatch_metrics();
    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 描述通知分发管道的指标，出现在 /metrics 的 HELP 注释中
fn describe_dispatch_metrics() {
    metrics::describe_counter!(
        "notifications_enqueued_total",
        "Total number of notifications published to the queue"
    );
    metrics::describe_counter!(
        "notification_status_seed_failures_total",
        "Status records that could not be seeded at enqueue time"
    );
    metrics::describe_counter!(
        "notification_messages_dropped_total",
        "Consumed messages dropped without processing"
    );
    metrics::describe_counter!(
        "notification_channel_outcomes_total",
        "Final per-channel outcomes, labelled by channel and state"
    );
    metrics::describe_counter!(
        "notifications_processed_total",
        "Notifications fully processed, labelled by aggregate status"
    );
    metrics::describe_gauge!(
        "notification_consumer_healthy",
        "1 when the dispatch consumer is pulling messages normally"
    );
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}
