//! PostgreSQL 连接池
//!
//! 启动阶段按重试策略建立连接池；重试耗尽视为不可恢复的启动失败，由调用方决定退出。

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{NotifyError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池，失败时按 `connect_retries` 指数退避重试
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let policy = RetryPolicy::from_millis(config.connect_retries, 500, 10_000);
        Self::connect_with_policy(config, &policy).await
    }

    #[instrument(skip_all, fields(url = %redact_url(&config.url)))]
    pub async fn connect_with_policy(config: &DatabaseConfig, policy: &RetryPolicy) -> Result<Self> {
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let pool = retry_with_policy(policy, "connect_database", NotifyError::is_retryable, || {
            let options = options.clone();
            async move { options.connect(&config.url).await.map_err(NotifyError::from) }
        })
        .await?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

/// 去掉连接串中的密码，用于日志输出
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };

    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
