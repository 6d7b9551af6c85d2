//! 通知分发服务
//!
//! 以消费组成员身份拉取通知请求，按渠道（email、sms、push）分发并维护投递状态。

use std::sync::Arc;

use anyhow::Result;
use notify_shared::{
    config::{AppConfig, StoreBackend},
    database::Database,
    observability,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use notification_worker::{
    DispatchConsumer, DispatchContext, DispatchSettings, StatusAggregator,
    adapter::AdapterRegistry,
    consumer::report_health,
    store::{InMemoryStatusStore, NotificationStatusStore, PgStatusStore},
    telemetry::{DispatchTelemetry, MetricsTelemetry},
};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting notification-worker...");
    info!(
        environment = %config.environment,
        topic = %config.dispatch.topic,
        consumer_group = %config.kafka.consumer_group,
        "Configuration loaded"
    );

    // 3. 状态存储
    let store: Arc<dyn NotificationStatusStore> = match config.dispatch.store_backend {
        StoreBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            db.health_check().await?;
            let store = PgStatusStore::new(db.pool().clone());
            store.migrate().await?;
            info!("PostgreSQL status store ready");
            Arc::new(store)
        }
        StoreBackend::Memory if config.is_production() => {
            anyhow::bail!("生产环境不允许使用内存状态存储");
        }
        StoreBackend::Memory => {
            warn!("使用内存状态存储，进程退出后状态将丢失");
            Arc::new(InMemoryStatusStore::new())
        }
    };

    // 4. 适配器注册表与遥测
    let registry = AdapterRegistry::with_defaults(&config.dispatch);
    let telemetry: Arc<dyn DispatchTelemetry> = Arc::new(MetricsTelemetry);

    let context = DispatchContext {
        registry,
        aggregator: StatusAggregator::new(store, config.dispatch.status_update_retries),
        telemetry: telemetry.clone(),
        settings: DispatchSettings::from(&config.dispatch),
    };

    // 5. 启动消费组成员
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let instances = config.dispatch.consumer_instances.max(1);
    let mut tasks = Vec::with_capacity(instances * 2);

    for instance in 0..instances {
        let consumer = DispatchConsumer::new(&config, context.clone())?;
        tasks.push(tokio::spawn(report_health(
            consumer.health(),
            telemetry.clone(),
        )));

        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(shutdown).await {
                error!(instance, error = %e, "通知分发消费者异常退出");
            }
        }));
    }
    info!(instances, "Dispatch consumers started");

    // 6. 等待退出信号
    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping consumers...");
    shutdown_tx.send_replace(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "后台任务异常结束");
        }
    }

    info!("notification-worker stopped");
    Ok(())
}
