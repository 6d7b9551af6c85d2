//! 可观测性模块集成测试
//!
//! 日志 subscriber 与指标 recorder 都是进程级全局状态，
//! 因此放在独立的测试进程中，并在单个测试里按顺序验证。

use notify_shared::config::ObservabilityConfig;
use notify_shared::observability;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// 向本地端口发送一个最简 HTTP GET，返回完整响应文本
async fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("连接指标端口失败");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_init_serves_metrics_and_health() {
    let config = ObservabilityConfig {
        log_level: "debug".to_string(),
        json_logs: true,
        metrics_enabled: true,
        metrics_port: 19464,
    };

    let guard = observability::init("observability-test", &config)
        .await
        .expect("初始化可观测性失败");

    metrics::counter!("notifications_enqueued_total").increment(3);

    let health = http_get(config.metrics_port, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("OK"));

    let body = http_get(config.metrics_port, "/metrics").await;
    assert!(body.contains("notifications_enqueued_total 3"));
    assert!(body.contains("service_starts_total"));

    // 全局 subscriber 已安装，再次初始化返回错误而不是 panic
    assert!(observability::init("observability-test", &config).await.is_err());

    drop(guard);
}
