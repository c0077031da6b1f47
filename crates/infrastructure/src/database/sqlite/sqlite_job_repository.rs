use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{JobFailure, JobType, MaintenanceStep, StorageMaintenanceJob};
use maintenance_domain::repositories::MaintenanceJobRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

const JOB_COLUMNS: &str = "job_number, job_name, job_type, configuration, cluster_snapshot, \
                           pending_operation, last_failure, scheduled_at, started_at";

/// 基于SQLite的维护队列
///
/// 作业与步骤分表存储，删除作业时级联删除步骤。所有写操作在同一事务中完成。
pub struct SqliteMaintenanceJobRepository {
    pool: SqlitePool,
}

impl SqliteMaintenanceJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_step(row: &SqliteRow) -> MaintenanceResult<MaintenanceStep> {
        let configuration: String = row.try_get("configuration")?;
        Ok(MaintenanceStep {
            job_number: row.try_get("job_number")?,
            step_number: row.try_get("step_number")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            configuration: serde_json::from_str(&configuration)?,
        })
    }

    fn row_to_job(row: &SqliteRow, steps: Vec<MaintenanceStep>) -> MaintenanceResult<StorageMaintenanceJob> {
        let job_number: i64 = row.try_get("job_number")?;
        let job_type: String = row.try_get("job_type")?;
        let job_type: JobType = job_type.parse()?;
        let configuration: String = row.try_get("configuration")?;
        let cluster_snapshot: String = row.try_get("cluster_snapshot")?;
        let last_failure: Option<String> = row.try_get("last_failure")?;
        let last_failure: Option<JobFailure> = last_failure
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let scheduled_at: DateTime<Utc> = row.try_get("scheduled_at")?;
        let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;

        let mut job = StorageMaintenanceJob::new(
            job_type,
            row.try_get::<String, _>("job_name")?,
            serde_json::from_str(&configuration)?,
        );
        job.cluster_snapshot = serde_json::from_str(&cluster_snapshot)?;
        job.steps = steps;
        job.pending_operation = row.try_get("pending_operation")?;
        job.last_failure = last_failure;
        job.scheduled_at = scheduled_at;
        job.started_at = started_at;
        job.assign_job_number(job_number);
        Ok(job)
    }

    async fn load_steps(conn: &mut SqliteConnection, job_number: i64) -> MaintenanceResult<Vec<MaintenanceStep>> {
        let rows = sqlx::query(
            "SELECT job_number, step_number, name, description, configuration \
             FROM maintenance_steps WHERE job_number = ? ORDER BY step_number",
        )
        .bind(job_number)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(Self::row_to_step).collect()
    }

    async fn insert_steps(conn: &mut SqliteConnection, job_number: i64, steps: &[MaintenanceStep]) -> MaintenanceResult<()> {
        for step in steps {
            sqlx::query(
                "INSERT INTO maintenance_steps (job_number, step_number, name, description, configuration) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(job_number)
            .bind(step.step_number)
            .bind(&step.name)
            .bind(&step.description)
            .bind(serde_json::to_string(&step.configuration)?)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// 插入到队尾并返回新的作业编号
    async fn append_job(conn: &mut SqliteConnection, job: &StorageMaintenanceJob) -> MaintenanceResult<i64> {
        let position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(queue_position), 0) + 1 FROM maintenance_jobs")
                .fetch_one(&mut *conn)
                .await?;

        let last_failure = job
            .last_failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_jobs (queue_position, job_name, job_type, configuration, cluster_snapshot,
                                          pending_operation, last_failure, scheduled_at, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position)
        .bind(&job.job_name)
        .bind(job.job_type.as_str())
        .bind(serde_json::to_string(job.configuration())?)
        .bind(serde_json::to_string(&job.cluster_snapshot)?)
        .bind(job.pending_operation)
        .bind(last_failure)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .execute(&mut *conn)
        .await?;

        let job_number = result.last_insert_rowid();
        Self::insert_steps(conn, job_number, &job.steps).await?;
        Ok(job_number)
    }

    async fn fetch_job(conn: &mut SqliteConnection, job_number: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM maintenance_jobs WHERE job_number = ?"
        ))
        .bind(job_number)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let steps = Self::load_steps(conn, job_number).await?;
                Ok(Some(Self::row_to_job(&row, steps)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_required(conn: &mut SqliteConnection, job_number: i64) -> MaintenanceResult<StorageMaintenanceJob> {
        Self::fetch_job(conn, job_number)
            .await?
            .ok_or(MaintenanceError::JobNotFound { job_number })
    }
}

#[async_trait]
impl MaintenanceJobRepository for SqliteMaintenanceJobRepository {
    #[instrument(skip(self, job), fields(job_name = %job.job_name, job_type = %job.job_type))]
    async fn create(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut tx = self.pool.begin().await?;
        let job_number = Self::append_job(&mut tx, job).await?;
        let created = Self::fetch_required(&mut tx, job_number).await?;
        tx.commit().await?;

        debug!(job_number, "维护作业已写入队列");
        Ok(created)
    }

    async fn find_by_job_number(&self, job_number: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_job(&mut conn, job_number).await
    }

    async fn find_all(&self) -> MaintenanceResult<Vec<StorageMaintenanceJob>> {
        // 同一事务内读取，保证作业和步骤的一致视图
        let mut tx = self.pool.begin().await?;

        let job_rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM maintenance_jobs ORDER BY queue_position"
        ))
        .fetch_all(&mut *tx)
        .await?;

        let step_rows = sqlx::query(
            "SELECT job_number, step_number, name, description, configuration \
             FROM maintenance_steps ORDER BY job_number, step_number",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut steps_by_job: HashMap<i64, Vec<MaintenanceStep>> = HashMap::new();
        for row in &step_rows {
            let step = Self::row_to_step(row)?;
            steps_by_job.entry(step.job_number).or_default().push(step);
        }

        job_rows
            .iter()
            .map(|row| {
                let job_number: i64 = row.try_get("job_number")?;
                let steps = steps_by_job.remove(&job_number).unwrap_or_default();
                Self::row_to_job(row, steps)
            })
            .collect()
    }

    async fn find_by_pending_operation(&self, operation_id: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let mut conn = self.pool.acquire().await?;
        let job_number: Option<i64> =
            sqlx::query_scalar("SELECT job_number FROM maintenance_jobs WHERE pending_operation = ?")
                .bind(operation_id)
                .fetch_optional(&mut *conn)
                .await?;

        match job_number {
            Some(job_number) => Self::fetch_job(&mut conn, job_number).await,
            None => Ok(None),
        }
    }

    #[instrument(skip(self, job), fields(job_number = job.job_number))]
    async fn update(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let last_failure = job
            .last_failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE maintenance_jobs
            SET job_name = ?, job_type = ?, configuration = ?, cluster_snapshot = ?,
                pending_operation = ?, last_failure = ?, scheduled_at = ?, started_at = ?
            WHERE job_number = ?
            "#,
        )
        .bind(&job.job_name)
        .bind(job.job_type.as_str())
        .bind(serde_json::to_string(job.configuration())?)
        .bind(serde_json::to_string(&job.cluster_snapshot)?)
        .bind(job.pending_operation)
        .bind(last_failure)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.job_number)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MaintenanceError::JobNotFound {
                job_number: job.job_number,
            });
        }

        sqlx::query("DELETE FROM maintenance_steps WHERE job_number = ?")
            .bind(job.job_number)
            .execute(&mut *tx)
            .await?;
        Self::insert_steps(&mut tx, job.job_number, &job.steps).await?;

        let updated = Self::fetch_required(&mut tx, job.job_number).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn remove_step(&self, job_number: i64, step_number: i32) -> MaintenanceResult<bool> {
        let result = sqlx::query("DELETE FROM maintenance_steps WHERE job_number = ? AND step_number = ?")
            .bind(job_number)
            .bind(step_number)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, job_number: i64) -> MaintenanceResult<bool> {
        let result = sqlx::query("DELETE FROM maintenance_jobs WHERE job_number = ?")
            .bind(job_number)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, replacement))]
    async fn requeue(
        &self,
        old_job_number: i64,
        replacement: &StorageMaintenanceJob,
    ) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM maintenance_jobs WHERE job_number = ?")
            .bind(old_job_number)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(MaintenanceError::JobNotFound {
                job_number: old_job_number,
            });
        }

        let job_number = Self::append_job(&mut tx, replacement).await?;
        let requeued = Self::fetch_required(&mut tx, job_number).await?;
        tx.commit().await?;

        debug!(old_job_number, new_job_number = job_number, "维护作业已重新入队");
        Ok(requeued)
    }

    async fn count(&self) -> MaintenanceResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM maintenance_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
