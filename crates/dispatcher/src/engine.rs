//! 维护执行引擎
//!
//! 每次 `execute()` 按入队顺序处理本轮开始时队列中的作业，逐个执行步骤：
//! 成功则删除步骤；ABORT 失败把剩余步骤以新编号重新入队；CONTINUE 失败先提交
//! 后续作业，再由计算器调整剩余步骤并继续执行。下发远程操作的步骤要等完成回调，
//! 等待中的作业会阻塞后面的作业。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use maintenance_core::MaintenanceResult;
use maintenance_domain::entities::{
    JobFailure, MaintenanceStep, StepFailureStrategy, StorageMaintenanceJob,
};
use maintenance_domain::ports::OperationCompletion;
use maintenance_infrastructure::MaintenanceMetrics;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::queue::MaintenanceQueue;
use crate::runners::{StepOutcome, StepRunner, StepRunnerRegistry};

/// 一轮执行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub jobs_completed: usize,
    pub steps_executed: usize,
    pub jobs_requeued: usize,
    pub follow_ups_scheduled: usize,
    /// 本轮因等待远程操作而提前结束
    pub awaiting_operation: bool,
}

enum JobProgress {
    Finished,
    Awaiting,
    Held,
    Stopped,
}

/// 关注作业中止的协作方，例如把失败记录到作业目标节点上
#[async_trait]
pub trait MaintenanceJobObserver: Send + Sync {
    async fn job_aborted(&self, job: &StorageMaintenanceJob, failure: &JobFailure);

    /// 返回 `true` 时作业暂不执行，并阻塞其后的作业
    async fn is_held(&self, _job: &StorageMaintenanceJob) -> MaintenanceResult<bool> {
        Ok(false)
    }
}

pub struct MaintenanceEngine {
    queue: Arc<MaintenanceQueue>,
    runners: StepRunnerRegistry,
    metrics: MaintenanceMetrics,
    observers: Vec<Arc<dyn MaintenanceJobObserver>>,
    execution_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl MaintenanceEngine {
    pub fn new(
        queue: Arc<MaintenanceQueue>,
        runners: StepRunnerRegistry,
        metrics: MaintenanceMetrics,
    ) -> Self {
        Self {
            queue,
            runners,
            metrics,
            observers: Vec::new(),
            execution_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MaintenanceJobObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn queue(&self) -> &Arc<MaintenanceQueue> {
        &self.queue
    }

    /// 请求停止，当前步骤结束后生效
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        info!("维护执行引擎停止信号已发送");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn execute(&self) -> MaintenanceResult<ExecutionSummary> {
        let _guard = self.execution_lock.lock().await;
        let mut summary = ExecutionSummary::default();

        let jobs = self.queue.load_queue().await?;
        if jobs.is_empty() {
            debug!("维护队列为空");
            return Ok(summary);
        }
        info!(jobs = jobs.len(), "开始执行维护队列");

        for job in jobs {
            if self.is_stopped() {
                break;
            }
            match self.execute_job(job, &mut summary).await? {
                JobProgress::Finished => {}
                JobProgress::Awaiting => {
                    summary.awaiting_operation = true;
                    break;
                }
                JobProgress::Held | JobProgress::Stopped => break,
            }
        }

        self.metrics.update_queue_depth(self.queue.depth().await?);
        info!(
            jobs_completed = summary.jobs_completed,
            steps_executed = summary.steps_executed,
            jobs_requeued = summary.jobs_requeued,
            follow_ups = summary.follow_ups_scheduled,
            awaiting = summary.awaiting_operation,
            "维护队列执行结束"
        );
        Ok(summary)
    }

    async fn execute_job(
        &self,
        mut job: StorageMaintenanceJob,
        summary: &mut ExecutionSummary,
    ) -> MaintenanceResult<JobProgress> {
        if job.is_awaiting_operation() {
            debug!(
                job_number = job.job_number,
                operation_id = job.pending_operation,
                "作业正在等待远程操作完成"
            );
            return Ok(JobProgress::Awaiting);
        }

        for observer in &self.observers {
            if observer.is_held(&job).await? {
                info!(job_number = job.job_number, "作业等待人工处理，暂停执行队列");
                return Ok(JobProgress::Held);
            }
        }

        if !job.is_started() {
            job.started_at = Some(Utc::now());
            job = self.queue.save(&job).await?;
        }
        info!(job_number = job.job_number, "执行{}", job.entity_description());

        while let Some(step) = job.next_step().cloned() {
            if self.is_stopped() {
                return Ok(JobProgress::Stopped);
            }

            let runner = match self.runners.get(&step.name) {
                Ok(runner) => runner,
                Err(e) => {
                    error!(job_number = job.job_number, step = %step.name, "{e}");
                    self.abort(&job, &step, e.to_string(), summary).await?;
                    return Ok(JobProgress::Finished);
                }
            };

            debug!(
                job_number = job.job_number,
                step_number = step.step_number,
                step = %step.name,
                "执行步骤"
            );
            let outcome = match runner.execute(&job, &step).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => StepOutcome::Failed(e.to_string()),
            };

            match outcome {
                StepOutcome::Completed => {
                    job.remove_step(step.step_number);
                    self.queue.remove_step(job.job_number, step.step_number).await?;
                    summary.steps_executed += 1;
                    self.metrics.record_step_executed(&step.name);
                }
                StepOutcome::Dispatched(handle) => {
                    job.pending_operation = Some(handle.operation_id);
                    self.queue.save(&job).await?;
                    info!(
                        job_number = job.job_number,
                        step_number = step.step_number,
                        operation_id = handle.operation_id,
                        address = %handle.target_address,
                        "已下发远程操作 {}，等待完成",
                        handle.operation_name
                    );
                    return Ok(JobProgress::Awaiting);
                }
                StepOutcome::Failed(message) => {
                    match self
                        .handle_step_failure(job, &step, runner.as_ref(), &message, summary)
                        .await?
                    {
                        Some(adjusted) => job = adjusted,
                        None => return Ok(JobProgress::Finished),
                    }
                }
            }
        }

        self.finish(&job, summary).await?;
        Ok(JobProgress::Finished)
    }

    /// 处理作业下发的远程操作的完成回调
    ///
    /// 返回该回调是否属于队列中的某个作业。
    pub async fn handle_operation_completion(
        &self,
        completion: &OperationCompletion,
    ) -> MaintenanceResult<bool> {
        if !completion.status.is_terminal() {
            return Ok(false);
        }

        let _guard = self.execution_lock.lock().await;
        let Some(mut job) = self.queue.find_job_by_operation(completion.operation_id).await? else {
            return Ok(false);
        };
        job.pending_operation = None;

        let Some(step) = job.next_step().cloned() else {
            self.queue.complete(job.job_number).await?;
            return Ok(true);
        };

        let mut summary = ExecutionSummary::default();
        if completion.is_success() {
            info!(
                job_number = job.job_number,
                step_number = step.step_number,
                operation_id = completion.operation_id,
                "远程操作成功"
            );
            job.remove_step(step.step_number);
            self.metrics.record_step_executed(&step.name);
            if job.is_complete() {
                self.finish(&job, &mut summary).await?;
            } else {
                self.queue.save(&job).await?;
            }
            return Ok(true);
        }

        let message = completion.failure_message();
        warn!(
            job_number = job.job_number,
            step_number = step.step_number,
            operation_id = completion.operation_id,
            status = %completion.status,
            "远程操作失败: {message}"
        );
        let runner = match self.runners.get(&step.name) {
            Ok(runner) => runner,
            Err(e) => {
                self.abort(&job, &step, e.to_string(), &mut summary).await?;
                return Ok(true);
            }
        };
        if let Some(adjusted) = self
            .handle_step_failure(job, &step, runner.as_ref(), &message, &mut summary)
            .await?
        {
            if adjusted.is_complete() {
                self.finish(&adjusted, &mut summary).await?;
            }
        }
        Ok(true)
    }

    /// 按执行器的失败策略处理失败步骤
    ///
    /// 作业继续执行时返回调整后的作业，作业被中止时返回 `None`。
    async fn handle_step_failure(
        &self,
        job: StorageMaintenanceJob,
        step: &MaintenanceStep,
        runner: &dyn StepRunner,
        message: &str,
        summary: &mut ExecutionSummary,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let strategy = runner.failure_strategy();
        self.metrics.record_step_failure(&step.name, strategy.as_str());
        warn!(
            job_number = job.job_number,
            step_number = step.step_number,
            step = %step.name,
            strategy = strategy.as_str(),
            "步骤执行失败: {message}"
        );

        if strategy == StepFailureStrategy::Abort {
            self.abort(&job, step, message.to_string(), summary).await?;
            return Ok(None);
        }

        match runner.follow_up_job(&job, step, message).await {
            Ok(Some(follow_up)) => {
                let scheduled = self.queue.schedule_maintenance(follow_up).await?;
                summary.follow_ups_scheduled += 1;
                info!(
                    job_number = job.job_number,
                    follow_up = scheduled.job_number,
                    "已提交后续作业: {}",
                    scheduled.job_name
                );
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(job_number = job.job_number, "生成后续作业失败: {e}"),
        }

        let mut adjusted = job.clone();
        let updated = match self.queue.calculator(&job) {
            Ok(calculator) => calculator.update_steps(&mut adjusted, step),
            Err(e) => Err(e),
        };
        if let Err(e) = updated {
            warn!(
                job_number = job.job_number,
                step = %step.name,
                "无法调整剩余步骤，改为中止作业: {e}"
            );
            self.abort(&job, step, message.to_string(), summary).await?;
            return Ok(None);
        }

        adjusted.remove_step(step.step_number);
        adjusted.pending_operation = None;
        adjusted.last_failure = Some(failure_record(step, StepFailureStrategy::Continue, message));
        let saved = self.queue.save(&adjusted).await?;
        Ok(Some(saved))
    }

    async fn abort(
        &self,
        job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
        message: String,
        summary: &mut ExecutionSummary,
    ) -> MaintenanceResult<()> {
        let failure = failure_record(step, StepFailureStrategy::Abort, &message);
        let requeued = self.queue.requeue(job, failure.clone()).await?;
        summary.jobs_requeued += 1;
        self.metrics.record_job_requeued(job.job_type.as_str());
        for observer in &self.observers {
            observer.job_aborted(&requeued, &failure).await;
        }
        Ok(())
    }

    async fn finish(
        &self,
        job: &StorageMaintenanceJob,
        summary: &mut ExecutionSummary,
    ) -> MaintenanceResult<()> {
        self.queue.complete(job.job_number).await?;
        summary.jobs_completed += 1;
        self.metrics.record_job_completed(job.job_type.as_str());
        info!(job_number = job.job_number, "维护作业已完成: {}", job.job_name);
        Ok(())
    }
}

fn failure_record(step: &MaintenanceStep, strategy: StepFailureStrategy, message: &str) -> JobFailure {
    JobFailure {
        step_number: step.step_number,
        step_name: step.name.clone(),
        strategy,
        message: message.to_string(),
        failed_at: Utc::now(),
    }
}
