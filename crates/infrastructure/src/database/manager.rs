use std::str::FromStr;
use std::time::Duration;

use maintenance_core::config::DatabaseConfig;
use maintenance_core::MaintenanceResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// SQLite 连接池与表结构
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> MaintenanceResult<Self> {
        debug!("连接维护数据库: {}", config.url);

        // 启用外键约束和WAL模式
        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;
        info!("维护数据库已就绪");
        Ok(manager)
    }

    /// 内存数据库只能使用单连接，否则每个连接看到的是不同的库
    pub async fn in_memory() -> MaintenanceResult<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> MaintenanceResult<()> {
        debug!("运行维护数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                cql_port INTEGER NOT NULL,
                jmx_port INTEGER NOT NULL,
                operation_mode TEXT NOT NULL,
                maintenance_pending BOOLEAN NOT NULL DEFAULT 0,
                error_message TEXT,
                failed_operation INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS maintenance_jobs (
                job_number INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_position INTEGER NOT NULL,
                job_name TEXT NOT NULL,
                job_type TEXT NOT NULL,
                configuration TEXT NOT NULL DEFAULT '{}',
                cluster_snapshot TEXT NOT NULL DEFAULT '[]',
                pending_operation INTEGER,
                last_failure TEXT,
                scheduled_at TEXT NOT NULL,
                started_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS maintenance_steps (
                job_number INTEGER NOT NULL,
                step_number INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                configuration TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (job_number, step_number),
                FOREIGN KEY (job_number) REFERENCES maintenance_jobs(job_number) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_maintenance_jobs_queue_position ON maintenance_jobs(queue_position)",
            "CREATE INDEX IF NOT EXISTS idx_maintenance_jobs_pending_operation ON maintenance_jobs(pending_operation)",
            "CREATE INDEX IF NOT EXISTS idx_storage_nodes_mode ON storage_nodes(operation_mode)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub async fn health_check(&self) -> MaintenanceResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
