//! 维护作业队列
//!
//! 队列本身保存在 [`MaintenanceJobRepository`] 中，这里负责在入队前计算步骤、
//! 记录集群快照，以及在拓扑变化后重新计算尚未开始的作业。

use std::sync::Arc;

use chrono::Utc;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{JobFailure, OperationMode, StorageMaintenanceJob};
use maintenance_domain::repositories::{MaintenanceJobRepository, StorageNodeRepository};
use tracing::{debug, info};

use crate::calculators::{CalculatorLookup, StepCalculator};

pub struct MaintenanceQueue {
    job_repo: Arc<dyn MaintenanceJobRepository>,
    node_repo: Arc<dyn StorageNodeRepository>,
    calculators: CalculatorLookup,
}

impl MaintenanceQueue {
    pub fn new(
        job_repo: Arc<dyn MaintenanceJobRepository>,
        node_repo: Arc<dyn StorageNodeRepository>,
        calculators: CalculatorLookup,
    ) -> Self {
        Self {
            job_repo,
            node_repo,
            calculators,
        }
    }

    pub fn calculator(
        &self,
        job: &StorageMaintenanceJob,
    ) -> MaintenanceResult<Arc<dyn StepCalculator>> {
        self.calculators.get(job.job_type)
    }

    /// 当前集群快照：所有 NORMAL 节点的地址，不含作业目标节点
    pub async fn cluster_snapshot(&self, target: Option<&str>) -> MaintenanceResult<Vec<String>> {
        let mut addresses: Vec<String> = self
            .node_repo
            .find_by_mode(OperationMode::Normal)
            .await?
            .into_iter()
            .map(|node| node.address)
            .filter(|address| Some(address.as_str()) != target)
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    /// 计算步骤（如尚未计算）并追加到队尾
    pub async fn schedule_maintenance(
        &self,
        mut job: StorageMaintenanceJob,
    ) -> MaintenanceResult<StorageMaintenanceJob> {
        let calculator = self.calculators.get(job.job_type)?;

        if job.cluster_snapshot.is_empty() {
            job.cluster_snapshot = self.cluster_snapshot(job.target()).await?;
        }
        if job.steps.is_empty() {
            job = calculator.calculate_steps(job)?;
        }
        job.scheduled_at = Utc::now();

        let created = self.job_repo.create(&job).await?;
        info!(
            job_number = created.job_number,
            job_type = %created.job_type,
            steps = created.steps.len(),
            "维护作业已入队: {}",
            created.job_name
        );
        Ok(created)
    }

    /// 按入队顺序返回全部作业
    pub async fn load_queue(&self) -> MaintenanceResult<Vec<StorageMaintenanceJob>> {
        self.job_repo.find_all().await
    }

    pub async fn load_job(&self, job_number: i64) -> MaintenanceResult<StorageMaintenanceJob> {
        self.job_repo
            .find_by_job_number(job_number)
            .await?
            .ok_or(MaintenanceError::JobNotFound { job_number })
    }

    /// 集群快照变化后重新计算尚未开始的作业
    pub async fn refresh_job(&self, job_number: i64) -> MaintenanceResult<StorageMaintenanceJob> {
        let job = self.load_job(job_number).await?;
        if job.is_started() {
            debug!(job_number, "作业已开始执行，不重新计算步骤");
            return Ok(job);
        }

        let snapshot = self.cluster_snapshot(job.target()).await?;
        if snapshot == job.cluster_snapshot {
            return Ok(job);
        }

        let calculator = self.calculators.get(job.job_type)?;
        let mut fresh = job.clone();
        fresh.steps.clear();
        fresh.cluster_snapshot = snapshot;
        let mut fresh = calculator.calculate_steps(fresh)?;
        fresh.assign_job_number(job_number);

        let updated = self.job_repo.update(&fresh).await?;
        info!(
            job_number,
            previous = ?job.cluster_snapshot,
            current = ?updated.cluster_snapshot,
            steps = updated.steps.len(),
            "集群拓扑已变化，重新计算作业步骤"
        );
        Ok(updated)
    }

    pub async fn save(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        self.job_repo.update(job).await
    }

    pub async fn remove_step(&self, job_number: i64, step_number: i32) -> MaintenanceResult<bool> {
        self.job_repo.remove_step(job_number, step_number).await
    }

    /// 作业全部步骤完成后出队
    pub async fn complete(&self, job_number: i64) -> MaintenanceResult<()> {
        self.job_repo.delete(job_number).await?;
        Ok(())
    }

    /// 用新的作业编号把剩余步骤重新排到队尾
    ///
    /// 保留开始时间，已经执行过部分步骤的作业不会再被 [`Self::refresh_job`] 重新计算。
    pub async fn requeue(
        &self,
        job: &StorageMaintenanceJob,
        failure: JobFailure,
    ) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut replacement = job.clone();
        replacement.renumber_steps();
        replacement.pending_operation = None;
        replacement.last_failure = Some(failure);
        replacement.scheduled_at = Utc::now();

        let requeued = self.job_repo.requeue(job.job_number, &replacement).await?;
        info!(
            job_number = job.job_number,
            new_job_number = requeued.job_number,
            steps = requeued.steps.len(),
            "作业已中止并重新入队"
        );
        Ok(requeued)
    }

    pub async fn find_job_by_operation(
        &self,
        operation_id: i64,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        self.job_repo.find_by_pending_operation(operation_id).await
    }

    pub async fn depth(&self) -> MaintenanceResult<usize> {
        self.job_repo.count().await
    }
}
